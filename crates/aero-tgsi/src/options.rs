//! Compiler-wide options: hardware capabilities and debug dumps.

use bitflags::bitflags;

use crate::limits::DEFAULT_WAVE_SIZE;

/// Comma-separated list of dumps to enable (`vs`, `fs`, `config`).
pub const DEBUG_ENV: &str = "AERO_TGSI_DEBUG";

/// Disables the scratch-based derivative lowering when set to a truthy value.
pub const DISABLE_DERIVATIVES_ENV: &str = "AERO_TGSI_DISABLE_DERIVATIVES";

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct DebugFlags: u32 {
        /// Trace the emitted vertex program.
        const DUMP_VS = 1 << 0;
        /// Trace the emitted fragment program.
        const DUMP_FS = 1 << 1;
        /// Trace the parsed backend configuration registers.
        const DUMP_CONFIG = 1 << 2;
    }
}

impl DebugFlags {
    /// Parses a comma-separated list; unknown entries are ignored with a warning.
    pub fn parse(list: &str) -> Self {
        let mut flags = DebugFlags::empty();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match item.to_ascii_lowercase().as_str() {
                "vs" => flags |= DebugFlags::DUMP_VS,
                "fs" => flags |= DebugFlags::DUMP_FS,
                "config" => flags |= DebugFlags::DUMP_CONFIG,
                "all" => flags |= DebugFlags::all(),
                other => tracing::warn!(flag = other, "unknown debug flag"),
            }
        }
        flags
    }
}

/// Hardware capabilities the ABI builder consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Capabilities {
    /// Lower DDX/DDY through a stage-local scratch area.
    pub derivatives: bool,
    /// Invocations per thread group; sizes the derivative scratch area.
    pub wave_size: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            derivatives: true,
            wave_size: DEFAULT_WAVE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompilerOptions {
    pub capabilities: Capabilities,
    pub debug: DebugFlags,
}

impl CompilerOptions {
    pub fn from_env() -> Self {
        let debug = std::env::var(DEBUG_ENV)
            .map(|v| DebugFlags::parse(&v))
            .unwrap_or_default();
        let capabilities = Capabilities {
            derivatives: !env_var_truthy(DISABLE_DERIVATIVES_ENV),
            ..Capabilities::default()
        };
        Self {
            capabilities,
            debug,
        }
    }
}

fn env_var_truthy(name: &str) -> bool {
    let Ok(raw) = std::env::var(name) else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}
