//! Static usage scan of a token stream.
//!
//! The translator never looks ahead in the token stream; everything it needs to know up front
//! (which constants to preload, which samplers are multisampled, whether derivatives are used)
//! comes from [`ShaderInfo`].

use std::collections::HashMap;

use crate::limits::{MAX_CONST_BUFFERS, MAX_TEXTURE_UNITS};
use crate::tgsi::{
    Declaration, File, Instruction, Opcode, Processor, Property, Semantic, TgsiShader, Token,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderInfo {
    pub processor: Option<Processor>,
    file_max: [Option<u32>; File::COUNT],
    /// Highest constant register referenced per constant buffer.
    pub const_file_max: [Option<u32>; MAX_CONST_BUFFERS as usize],
    pub opcode_count: HashMap<Opcode, u32>,
    /// Bit `i` is set when sampler `i` is used with a multisampled target.
    pub msaa_samplers: u32,
    pub writes_z: bool,
    pub writes_stencil: bool,
    pub color0_writes_all_cbufs: bool,
    pub num_inputs: u32,
    pub num_outputs: u32,
}

impl ShaderInfo {
    pub fn scan(shader: &TgsiShader) -> Self {
        let mut info = ShaderInfo {
            processor: shader.processor,
            ..Default::default()
        };

        for token in &shader.tokens {
            match token {
                Token::Declaration(decl) => info.scan_declaration(decl, shader.processor),
                Token::Immediate(_) => {
                    let next = info.file_max(File::Immediate).map_or(0, |m| m + 1);
                    info.set_file_max(File::Immediate, next);
                }
                Token::Property(Property::FsColor0WritesAllCbufs(v)) => {
                    info.color0_writes_all_cbufs = *v;
                }
                Token::Instruction(inst) => info.scan_instruction(inst),
            }
        }

        info
    }

    fn scan_declaration(&mut self, decl: &Declaration, processor: Option<Processor>) {
        match decl.file {
            File::Constant => self.note_constant(decl.dimension, decl.last),
            file => self.set_file_max(file, decl.last),
        }

        let count = decl.last.saturating_sub(decl.first) + 1;
        match decl.file {
            File::Input => self.num_inputs += count,
            File::Output => {
                self.num_outputs += count;
                if processor == Some(Processor::Fragment) {
                    match decl.semantic_name() {
                        Some(Semantic::Position) => self.writes_z = true,
                        Some(Semantic::Stencil) => self.writes_stencil = true,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    fn scan_instruction(&mut self, inst: &Instruction) {
        *self.opcode_count.entry(inst.opcode).or_insert(0) += 1;

        for dst in &inst.dst {
            self.set_file_max(dst.file, dst.index);
        }
        for src in &inst.src {
            match src.file {
                // Indirectly addressed constants are covered by the declared range.
                File::Constant if src.indirect.is_none() => {
                    self.note_constant(src.dimension, src.index)
                }
                File::Constant => {}
                file => self.set_file_max(file, src.index),
            }
        }

        if let (Some(target), Some(sampler)) = (inst.texture, inst.src.last()) {
            if target.is_msaa() && sampler.file == File::Sampler && sampler.index < MAX_TEXTURE_UNITS
            {
                self.msaa_samplers |= 1 << sampler.index;
            }
        }
    }

    fn note_constant(&mut self, buffer: u32, index: u32) {
        if let Some(max) = self.const_file_max.get_mut(buffer as usize) {
            *max = Some(max.map_or(index, |m| m.max(index)));
        }
    }

    /// Highest register index declared or referenced in `file`.
    pub fn file_max(&self, file: File) -> Option<u32> {
        self.file_max[file.index()]
    }

    pub fn set_file_max(&mut self, file: File, index: u32) {
        let slot = &mut self.file_max[file.index()];
        *slot = Some(slot.map_or(index, |m| m.max(index)));
    }

    /// Number of constant registers (vec4) to preload from `buffer`.
    pub fn num_constants(&self, buffer: u32) -> u32 {
        self.const_file_max
            .get(buffer as usize)
            .copied()
            .flatten()
            .map_or(0, |m| m + 1)
    }

    pub fn num_samplers(&self) -> u32 {
        self.file_max(File::Sampler).map_or(0, |m| m + 1)
    }

    pub fn is_msaa_sampler(&self, index: u32) -> bool {
        index < 32 && (self.msaa_samplers >> index) & 1 != 0
    }

    pub fn opcode_count(&self, opcode: Opcode) -> u32 {
        self.opcode_count.get(&opcode).copied().unwrap_or(0)
    }

    pub fn uses_derivatives(&self) -> bool {
        self.opcode_count(Opcode::Ddx) > 0 || self.opcode_count(Opcode::Ddy) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tgsi::{DstRegister, SrcRegister, TextureTarget};

    #[test]
    fn scan_tracks_constant_buffers_independently() {
        let mut shader = TgsiShader::new(Processor::Vertex);
        shader
            .declare(Declaration::constants(0, 0, 3))
            .declare(Declaration::constants(2, 0, 0))
            .push(Instruction::new(
                Opcode::Mov,
                vec![DstRegister::new(File::Temporary, 0)],
                vec![SrcRegister::new(File::Constant, 5).in_buffer(2)],
            ));

        let info = ShaderInfo::scan(&shader);
        assert_eq!(info.num_constants(0), 4);
        assert_eq!(info.num_constants(1), 0);
        assert_eq!(info.num_constants(2), 6);
        assert_eq!(info.file_max(File::Temporary), Some(0));
    }

    #[test]
    fn scan_marks_msaa_samplers_and_derivatives() {
        let mut shader = TgsiShader::new(Processor::Fragment);
        shader
            .declare(Declaration::sampler(0))
            .declare(Declaration::sampler(3))
            .push(Instruction::texture(
                Opcode::Txf,
                TextureTarget::Tex2DMsaa,
                DstRegister::new(File::Temporary, 0),
                vec![
                    SrcRegister::new(File::Input, 0),
                    SrcRegister::new(File::Sampler, 3),
                ],
            ))
            .push(Instruction::new(
                Opcode::Ddy,
                vec![DstRegister::new(File::Temporary, 1)],
                vec![SrcRegister::new(File::Temporary, 0)],
            ));

        let info = ShaderInfo::scan(&shader);
        assert!(info.is_msaa_sampler(3));
        assert!(!info.is_msaa_sampler(0));
        assert_eq!(info.num_samplers(), 4);
        assert!(info.uses_derivatives());
    }

    #[test]
    fn scan_records_fragment_depth_and_stencil_writes() {
        let mut shader = TgsiShader::new(Processor::Fragment);
        shader
            .declare(Declaration::output(0, Semantic::Position, 0))
            .declare(Declaration::output(1, Semantic::Stencil, 0))
            .property(Property::FsColor0WritesAllCbufs(true));

        let info = ShaderInfo::scan(&shader);
        assert!(info.writes_z);
        assert!(info.writes_stencil);
        assert!(info.color0_writes_all_cbufs);
        assert_eq!(info.num_outputs, 2);
    }
}
