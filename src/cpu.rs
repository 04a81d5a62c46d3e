//! Implementation of the core CPU ([Sharp LR35902](https://en.wikipedia.org/wiki/Game_Boy)) logic.
//!
//! The CPU owns the memory bus together with the devices that live
//! inside the processor package: high RAM and the IE/IF interrupt
//! registers, which are wired onto the bus when the CPU is plugged.
//! Instruction behavior is driven by the descriptor tables in
//! [`crate::inst`]: the dispatcher switches on the family tag and
//! decodes operands straight from the opcode bits.

use busboy_common::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::{
    alu::{self, AluOut, FlagSrc, RotDir, CARRY_FLAG, HALF_FLAG, SUB_FLAG, ZERO_FLAG},
    assert_pedantic_gb,
    bit::BitOps,
    bus::Bus,
    consts::{HRAM_END_ADDR, HRAM_SIZE, HRAM_START_ADDR, IE_ADDR, IF_ADDR, INT_VECTOR_BASE},
    debugln,
    inst::{Family, OpDesc, EXTENDED, INSTRUCTIONS, PREFIX},
    mem::Component,
    panic_gb,
};

/// Machine cycles consumed by an interrupt dispatch.
pub const INTERRUPT_CYCLES: u8 = 5;

/// The five maskable interrupt sources, ordered by priority. The
/// handler of interrupt `i` sits at `0x40 + (i << 3)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
    VBlank = 0,
    LcdStat = 1,
    Timer = 2,
    Serial = 3,
    Joypad = 4,
}

impl Interrupt {
    #[inline(always)]
    pub fn mask(&self) -> u8 {
        1 << (*self as u8)
    }

    #[inline(always)]
    pub fn vector(&self) -> u16 {
        INT_VECTOR_BASE + ((*self as u16) << 3)
    }
}

pub struct Cpu {
    pub pc: u16,
    pub sp: u16,
    pub a: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,

    /// Flags register; only the high nibble is ever populated.
    f: u8,

    ime: bool,
    halted: bool,

    /// Remaining machine cycles of the instruction (or interrupt
    /// dispatch) currently in flight; the CPU stalls while non-zero.
    idle_time: u32,

    /// Address of the last write performed through the CPU, or zero
    /// when no write happened this cycle. Drained by the driver and
    /// offered to the bus listeners.
    write_listener: u16,

    /// Scratch output of the last ALU primitive, consumed by the
    /// flag combiner.
    alu: AluOut,

    /// The memory bus every access goes through.
    bus: Bus,

    // processor-package devices
    hram: Component,
    ie: Component,
    iflag: Component,
}

impl Cpu {
    pub fn new(bus: Bus) -> Self {
        Self {
            pc: 0x0,
            sp: 0x0,
            a: 0x0,
            b: 0x0,
            c: 0x0,
            d: 0x0,
            e: 0x0,
            h: 0x0,
            l: 0x0,
            f: 0x0,
            ime: false,
            halted: false,
            idle_time: 0,
            write_listener: 0,
            alu: AluOut::default(),
            bus,
            hram: Component::new(HRAM_SIZE),
            ie: Component::new(1),
            iflag: Component::new(1),
        }
    }

    /// Wires the processor-package devices onto the bus: high RAM
    /// plus the IE and IF registers. IF sits inside the I/O page and
    /// shadows the plain RAM cell there.
    pub fn plug(&mut self) -> Result<(), Error> {
        self.bus.plug(&mut self.hram, HRAM_START_ADDR, HRAM_END_ADDR)?;
        self.bus.plug(&mut self.ie, IE_ADDR, IE_ADDR)?;
        self.bus.forced_plug(&mut self.iflag, IF_ADDR, IF_ADDR, 0)?;
        Ok(())
    }

    /// Removes the processor-package devices from the bus again,
    /// part of the system teardown sequence.
    pub fn unplug(&mut self) {
        self.bus.unplug(&mut self.iflag);
        self.bus.unplug(&mut self.ie);
        self.bus.unplug(&mut self.hram);
    }

    /// Advances the CPU by one machine cycle: either burns one cycle
    /// of the instruction in flight or fetches and dispatches the
    /// next one (servicing interrupts first).
    pub fn cycle(&mut self) -> Result<(), Error> {
        self.write_listener = 0;
        if self.idle_time > 0 {
            self.idle_time -= 1;
            return Ok(());
        }
        self.do_cycle()
    }

    fn do_cycle(&mut self) -> Result<(), Error> {
        // prefetch the pending interrupt lines so the halted state
        // can be released and the dispatch decision taken in one go
        let pending = self.interrupt_enable() & self.interrupt_flag() & 0x1f;

        // a halted CPU does nothing until an enabled interrupt is
        // latched; the wake-up happens regardless of IME
        if self.halted {
            if pending == 0 {
                return Ok(());
            }
            self.halted = false;
        }

        if self.ime && pending != 0 {
            let index = pending.trailing_zeros() as u8;
            debugln!(
                "Going to run interrupt handler (0x{:04x})",
                INT_VECTOR_BASE + ((index as u16) << 3)
            );
            self.ime = false;
            self.set_interrupt_flag(self.interrupt_flag().reset_bit(index));
            self.push_word(self.pc)?;
            self.pc = INT_VECTOR_BASE + ((index as u16) << 3);
            self.idle_time += INTERRUPT_CYCLES as u32;
            return Ok(());
        }

        let pc = self.pc;

        assert_pedantic_gb!(
            !(0x8000..=0x9fff).contains(&pc),
            "Invalid PC area at 0x{:04x}",
            pc
        );

        // fetches the descriptor for the current instruction,
        // following the 0xCB prefix into the extended table
        let mut opcode = self.bus.read(pc);
        let desc: &'static OpDesc = if opcode == PREFIX {
            opcode = self.bus.read(pc.wrapping_add(1));
            &EXTENDED[opcode as usize]
        } else {
            &INSTRUCTIONS[opcode as usize]
        };

        #[cfg(feature = "cpulog")]
        println!("{}", self.description(desc, pc));

        self.dispatch(desc, opcode)?;
        self.idle_time += (desc.cycles - 1) as u32;
        Ok(())
    }

    fn dispatch(&mut self, desc: &'static OpDesc, opcode: u8) -> Result<(), Error> {
        if desc.family == Family::Illegal {
            return Err(Error::Opcode(opcode));
        }
        if desc.family.is_control() {
            return self.execute_control(desc, opcode);
        }
        if desc.family.is_storage() {
            self.execute_storage(desc, opcode)?;
        } else {
            self.execute_arith(desc, opcode)?;
        }
        self.pc = self.pc.wrapping_add(desc.bytes as u16);
        Ok(())
    }

    fn execute_storage(&mut self, desc: &OpDesc, opcode: u8) -> Result<(), Error> {
        match desc.family {
            Family::LdRR => {
                let value = self.reg8(opcode & 0x07);
                self.set_reg8((opcode >> 3) & 0x07, value)?;
            }
            Family::LdRN8 => {
                let value = self.imm8();
                self.set_reg8((opcode >> 3) & 0x07, value)?;
            }
            Family::LdRHlr => {
                let value = self.read_at(self.hl());
                self.set_reg8((opcode >> 3) & 0x07, value)?;
            }
            Family::LdHlrR => {
                let value = self.reg8(opcode & 0x07);
                self.write_at(self.hl(), value)?;
            }
            Family::LdHlrN8 => {
                let value = self.imm8();
                self.write_at(self.hl(), value)?;
            }
            Family::LdABcr => self.a = self.read_at(self.bc()),
            Family::LdADer => self.a = self.read_at(self.de()),
            Family::LdBcrA => self.write_at(self.bc(), self.a)?,
            Family::LdDerA => self.write_at(self.de(), self.a)?,
            Family::LdAHlru => {
                self.a = self.read_at(self.hl());
                self.update_hl(opcode);
            }
            Family::LdHlruA => {
                self.write_at(self.hl(), self.a)?;
                self.update_hl(opcode);
            }
            Family::LdAN8r => {
                let addr = 0xff00 | self.imm8() as u16;
                self.a = self.read_at(addr);
            }
            Family::LdN8rA => {
                let addr = 0xff00 | self.imm8() as u16;
                self.write_at(addr, self.a)?;
            }
            Family::LdACr => self.a = self.read_at(0xff00 | self.c as u16),
            Family::LdCrA => self.write_at(0xff00 | self.c as u16, self.a)?,
            Family::LdAN16r => {
                let addr = self.imm16();
                self.a = self.read_at(addr);
            }
            Family::LdN16rA => {
                let addr = self.imm16();
                self.write_at(addr, self.a)?;
            }
            Family::LdR16N16 => {
                let value = self.imm16();
                self.set_reg16sp((opcode >> 4) & 0x03, value);
            }
            Family::LdN16rSp => {
                let addr = self.imm16();
                self.write16_at(addr, self.sp)?;
            }
            Family::LdSpHl => self.sp = self.hl(),
            Family::Push => self.push_word(self.reg16af((opcode >> 4) & 0x03))?,
            Family::Pop => {
                let value = self.pop_word();
                self.set_reg16af((opcode >> 4) & 0x03, value);
            }
            family => panic_gb!("Invalid storage family {:?}", family),
        }
        Ok(())
    }

    fn execute_arith(&mut self, desc: &OpDesc, opcode: u8) -> Result<(), Error> {
        match desc.family {
            Family::AddAR8 | Family::AddAHlr | Family::AddAN8 => {
                let operand = self.alu_operand(desc.family, opcode);
                let carry = opcode & 0x08 == 0x08 && self.flag_c();
                self.alu = alu::add8(self.a, operand, carry);
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Alu, FlagSrc::Alu);
            }
            Family::SubAR8 | Family::SubAHlr | Family::SubAN8 => {
                let operand = self.alu_operand(desc.family, opcode);
                let carry = opcode & 0x08 == 0x08 && self.flag_c();
                self.alu = alu::sub8(self.a, operand, carry);
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Set, FlagSrc::Alu, FlagSrc::Alu);
            }
            Family::AndAR8 | Family::AndAHlr | Family::AndAN8 => {
                let operand = self.alu_operand(desc.family, opcode);
                self.alu = alu::and(self.a, operand);
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Set, FlagSrc::Clear);
            }
            Family::OrAR8 | Family::OrAHlr | Family::OrAN8 => {
                let operand = self.alu_operand(desc.family, opcode);
                self.alu = alu::or(self.a, operand);
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Clear);
            }
            Family::XorAR8 | Family::XorAHlr | Family::XorAN8 => {
                let operand = self.alu_operand(desc.family, opcode);
                self.alu = alu::xor(self.a, operand);
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Clear);
            }
            Family::CpAR8 | Family::CpAHlr | Family::CpAN8 => {
                // compare is a subtraction with the result discarded
                let operand = self.alu_operand(desc.family, opcode);
                self.alu = alu::sub8(self.a, operand, false);
                self.combine_flags(FlagSrc::Alu, FlagSrc::Set, FlagSrc::Alu, FlagSrc::Alu);
            }
            Family::IncR8 => {
                let code = (opcode >> 3) & 0x07;
                self.alu = alu::add8(self.reg8(code), 1, false);
                let value = self.alu.value as u8;
                self.set_reg8(code, value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Alu, FlagSrc::Cpu);
            }
            Family::DecR8 => {
                let code = (opcode >> 3) & 0x07;
                self.alu = alu::sub8(self.reg8(code), 1, false);
                let value = self.alu.value as u8;
                self.set_reg8(code, value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Set, FlagSrc::Alu, FlagSrc::Cpu);
            }
            Family::IncHlr => {
                self.alu = alu::add8(self.read_at(self.hl()), 1, false);
                let value = self.alu.value as u8;
                self.write_at(self.hl(), value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Alu, FlagSrc::Cpu);
            }
            Family::DecHlr => {
                self.alu = alu::sub8(self.read_at(self.hl()), 1, false);
                let value = self.alu.value as u8;
                self.write_at(self.hl(), value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Set, FlagSrc::Alu, FlagSrc::Cpu);
            }
            Family::IncR16 => {
                let pair = (opcode >> 4) & 0x03;
                let value = self.reg16sp(pair).wrapping_add(1);
                self.set_reg16sp(pair, value);
            }
            Family::DecR16 => {
                let pair = (opcode >> 4) & 0x03;
                let value = self.reg16sp(pair).wrapping_sub(1);
                self.set_reg16sp(pair, value);
            }
            Family::AddHlR16 => {
                let operand = self.reg16sp((opcode >> 4) & 0x03);
                self.alu = alu::add16_high(self.hl(), operand);
                let value = self.alu.value;
                self.set_hl(value);
                self.combine_flags(FlagSrc::Cpu, FlagSrc::Clear, FlagSrc::Alu, FlagSrc::Alu);
            }
            Family::LdHlSpS8 => {
                let offset = self.imm8() as i8 as u16;
                self.alu = alu::add16_low(self.sp, offset);
                let value = self.alu.value;
                if opcode & 0x10 == 0x00 {
                    self.sp = value;
                } else {
                    self.set_hl(value);
                }
                self.combine_flags(FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu, FlagSrc::Alu);
            }
            Family::Rotca => {
                self.alu = alu::rotate(Self::rot_dir(opcode), self.a);
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::Rota => {
                self.alu = alu::carry_rotate(Self::rot_dir(opcode), self.a, self.flag_c());
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::RotR8 => {
                let code = opcode & 0x07;
                self.alu = self.rotate_of(opcode, self.reg8(code));
                let value = self.alu.value as u8;
                self.set_reg8(code, value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::RotHlr => {
                self.alu = self.rotate_of(opcode, self.read_at(self.hl()));
                let value = self.alu.value as u8;
                self.write_at(self.hl(), value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::ShiftR8 => {
                let code = opcode & 0x07;
                self.alu = Self::shift_of(opcode, self.reg8(code));
                let value = self.alu.value as u8;
                self.set_reg8(code, value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::ShiftHlr => {
                self.alu = Self::shift_of(opcode, self.read_at(self.hl()));
                let value = self.alu.value as u8;
                self.write_at(self.hl(), value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::SwapR8 => {
                let code = opcode & 0x07;
                self.alu = alu::swap(self.reg8(code));
                let value = self.alu.value as u8;
                self.set_reg8(code, value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Clear);
            }
            Family::SwapHlr => {
                self.alu = alu::swap(self.read_at(self.hl()));
                let value = self.alu.value as u8;
                self.write_at(self.hl(), value)?;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Clear);
            }
            Family::BitU3R8 => {
                let index = (opcode >> 3) & 0x07;
                self.alu = alu::and(self.reg8(opcode & 0x07), 1 << index);
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Set, FlagSrc::Cpu);
            }
            Family::BitU3Hlr => {
                let index = (opcode >> 3) & 0x07;
                self.alu = alu::and(self.read_at(self.hl()), 1 << index);
                self.combine_flags(FlagSrc::Alu, FlagSrc::Clear, FlagSrc::Set, FlagSrc::Cpu);
            }
            Family::ChgU3R8 => {
                let index = (opcode >> 3) & 0x07;
                let code = opcode & 0x07;
                let value = self.reg8(code).edit_bit(index, opcode & 0x40 == 0x40);
                self.set_reg8(code, value)?;
            }
            Family::ChgU3Hlr => {
                let index = (opcode >> 3) & 0x07;
                let value = self
                    .read_at(self.hl())
                    .edit_bit(index, opcode & 0x40 == 0x40);
                self.write_at(self.hl(), value)?;
            }
            Family::Daa => {
                self.alu = alu::daa(self.a, self.flag_n(), self.flag_h(), self.flag_c());
                self.a = self.alu.value as u8;
                self.combine_flags(FlagSrc::Alu, FlagSrc::Cpu, FlagSrc::Clear, FlagSrc::Alu);
            }
            Family::Cpl => {
                self.a = !self.a;
                self.combine_flags(FlagSrc::Cpu, FlagSrc::Set, FlagSrc::Set, FlagSrc::Cpu);
            }
            Family::Sccf => {
                // SCF sets the carry, CCF complements it
                let carry = if opcode & 0x08 == 0x08 {
                    !self.flag_c()
                } else {
                    true
                };
                self.alu = AluOut {
                    value: 0,
                    flags: if carry { CARRY_FLAG } else { 0x00 },
                };
                self.combine_flags(FlagSrc::Cpu, FlagSrc::Clear, FlagSrc::Clear, FlagSrc::Alu);
            }
            family => panic_gb!("Invalid arithmetic family {:?}", family),
        }
        Ok(())
    }

    fn execute_control(&mut self, desc: &OpDesc, opcode: u8) -> Result<(), Error> {
        match desc.family {
            Family::Nop | Family::Stop => self.pc = self.pc.wrapping_add(desc.bytes as u16),
            Family::Halt => {
                self.halted = true;
                self.pc = self.pc.wrapping_add(desc.bytes as u16);
            }
            Family::Edi => {
                self.ime = opcode & 0x08 == 0x08;
                self.pc = self.pc.wrapping_add(desc.bytes as u16);
            }
            Family::JpN16 => self.pc = self.imm16(),
            Family::JpHl => self.pc = self.hl(),
            Family::JrE8 => self.pc = self.jr_target(desc),
            Family::JpCcN16 => {
                if self.condition(opcode) {
                    self.pc = self.imm16();
                    self.idle_time += desc.xtra as u32;
                } else {
                    self.pc = self.pc.wrapping_add(desc.bytes as u16);
                }
            }
            Family::JrCcE8 => {
                if self.condition(opcode) {
                    self.pc = self.jr_target(desc);
                    self.idle_time += desc.xtra as u32;
                } else {
                    self.pc = self.pc.wrapping_add(desc.bytes as u16);
                }
            }
            Family::CallN16 => {
                let target = self.imm16();
                self.push_word(self.pc.wrapping_add(desc.bytes as u16))?;
                self.pc = target;
            }
            Family::CallCcN16 => {
                if self.condition(opcode) {
                    let target = self.imm16();
                    self.push_word(self.pc.wrapping_add(desc.bytes as u16))?;
                    self.pc = target;
                    self.idle_time += desc.xtra as u32;
                } else {
                    self.pc = self.pc.wrapping_add(desc.bytes as u16);
                }
            }
            Family::Ret => self.pc = self.pop_word(),
            Family::RetCc => {
                if self.condition(opcode) {
                    self.pc = self.pop_word();
                    self.idle_time += desc.xtra as u32;
                } else {
                    self.pc = self.pc.wrapping_add(desc.bytes as u16);
                }
            }
            Family::Reti => {
                self.ime = true;
                self.pc = self.pop_word();
            }
            Family::Rst => {
                self.push_word(self.pc.wrapping_add(desc.bytes as u16))?;
                self.pc = (((opcode >> 3) & 0x07) as u16) << 3;
            }
            family => panic_gb!("Invalid control family {:?}", family),
        }
        Ok(())
    }

    // operand decoding helpers

    fn alu_operand(&self, family: Family, opcode: u8) -> u8 {
        match family {
            Family::AddAR8
            | Family::SubAR8
            | Family::AndAR8
            | Family::OrAR8
            | Family::XorAR8
            | Family::CpAR8 => self.reg8(opcode & 0x07),
            Family::AddAHlr
            | Family::SubAHlr
            | Family::AndAHlr
            | Family::OrAHlr
            | Family::XorAHlr
            | Family::CpAHlr => self.read_at(self.hl()),
            _ => self.imm8(),
        }
    }

    fn rot_dir(opcode: u8) -> RotDir {
        if opcode & 0x08 == 0x08 {
            RotDir::Right
        } else {
            RotDir::Left
        }
    }

    fn rotate_of(&self, opcode: u8, value: u8) -> AluOut {
        let dir = Self::rot_dir(opcode);
        if opcode & 0x10 == 0x10 {
            alu::carry_rotate(dir, value, self.flag_c())
        } else {
            alu::rotate(dir, value)
        }
    }

    fn shift_of(opcode: u8, value: u8) -> AluOut {
        match (opcode >> 3) & 0x07 {
            0x04 => alu::shift_left(value),
            0x05 => alu::shift_right_arith(value),
            _ => alu::shift_right_logical(value),
        }
    }

    /// Checks the branch condition encoded in bits 3..4 of the opcode
    /// (NZ, Z, NC, C) against the current flags.
    fn condition(&self, opcode: u8) -> bool {
        match (opcode >> 3) & 0x03 {
            0x00 => !self.flag_z(),
            0x01 => self.flag_z(),
            0x02 => !self.flag_c(),
            _ => self.flag_c(),
        }
    }

    fn jr_target(&self, desc: &OpDesc) -> u16 {
        let offset = self.imm8() as i8 as u16;
        self.pc.wrapping_add(desc.bytes as u16).wrapping_add(offset)
    }

    fn update_hl(&mut self, opcode: u8) {
        let value = if opcode & 0x10 == 0x00 {
            self.hl().wrapping_add(1)
        } else {
            self.hl().wrapping_sub(1)
        };
        self.set_hl(value);
    }

    #[inline(always)]
    fn imm8(&self) -> u8 {
        self.bus.read(self.pc.wrapping_add(1))
    }

    #[inline(always)]
    fn imm16(&self) -> u16 {
        self.bus.read16(self.pc.wrapping_add(1))
    }

    fn reg8(&self, code: u8) -> u8 {
        match code {
            0x00 => self.b,
            0x01 => self.c,
            0x02 => self.d,
            0x03 => self.e,
            0x04 => self.h,
            0x05 => self.l,
            0x06 => self.read_at(self.hl()),
            _ => self.a,
        }
    }

    fn set_reg8(&mut self, code: u8, value: u8) -> Result<(), Error> {
        match code {
            0x00 => self.b = value,
            0x01 => self.c = value,
            0x02 => self.d = value,
            0x03 => self.e = value,
            0x04 => self.h = value,
            0x05 => self.l = value,
            0x06 => self.write_at(self.hl(), value)?,
            _ => self.a = value,
        }
        Ok(())
    }

    fn reg16sp(&self, pair: u8) -> u16 {
        match pair {
            0x00 => self.bc(),
            0x01 => self.de(),
            0x02 => self.hl(),
            _ => self.sp,
        }
    }

    fn set_reg16sp(&mut self, pair: u8, value: u16) {
        match pair {
            0x00 => self.set_bc(value),
            0x01 => self.set_de(value),
            0x02 => self.set_hl(value),
            _ => self.sp = value,
        }
    }

    fn reg16af(&self, pair: u8) -> u16 {
        match pair {
            0x00 => self.bc(),
            0x01 => self.de(),
            0x02 => self.hl(),
            _ => self.af(),
        }
    }

    fn set_reg16af(&mut self, pair: u8, value: u16) {
        match pair {
            0x00 => self.set_bc(value),
            0x01 => self.set_de(value),
            0x02 => self.set_hl(value),
            _ => self.set_af(value),
        }
    }

    // bus access

    #[inline(always)]
    pub fn read_at(&self, addr: u16) -> u8 {
        self.bus.read(addr)
    }

    /// Writes a byte through the CPU, recording the address for the
    /// driver's listener fan-out.
    pub fn write_at(&mut self, addr: u16, value: u8) -> Result<(), Error> {
        self.bus.write(addr, value)?;
        self.write_listener = addr;
        Ok(())
    }

    /// 16-bit variant of [`Cpu::write_at`]; the two stores collapse to
    /// the base address in the listener slot.
    pub fn write16_at(&mut self, addr: u16, value: u16) -> Result<(), Error> {
        self.bus.write16(addr, value)?;
        self.write_listener = addr;
        Ok(())
    }

    pub fn push_word(&mut self, word: u16) -> Result<(), Error> {
        self.sp = self.sp.wrapping_sub(2);
        self.write16_at(self.sp, word)
    }

    pub fn pop_word(&mut self) -> u16 {
        let word = self.bus.read16(self.sp);
        self.sp = self.sp.wrapping_add(2);
        word
    }

    // flags

    #[inline(always)]
    pub fn f(&self) -> u8 {
        self.f
    }

    /// Stores the flags register; the low nibble always reads as zero.
    #[inline(always)]
    pub fn set_f(&mut self, value: u8) {
        self.f = value & 0xf0;
    }

    #[inline(always)]
    pub fn flag_z(&self) -> bool {
        self.f & ZERO_FLAG == ZERO_FLAG
    }

    #[inline(always)]
    pub fn flag_n(&self) -> bool {
        self.f & SUB_FLAG == SUB_FLAG
    }

    #[inline(always)]
    pub fn flag_h(&self) -> bool {
        self.f & HALF_FLAG == HALF_FLAG
    }

    #[inline(always)]
    pub fn flag_c(&self) -> bool {
        self.f & CARRY_FLAG == CARRY_FLAG
    }

    /// Rebuilds the F register, selecting each flag bit from the
    /// requested source (cleared, set, ALU result or current value).
    fn combine_flags(&mut self, zero: FlagSrc, sub: FlagSrc, half: FlagSrc, carry: FlagSrc) {
        let alu = self.alu.flags;
        let current = self.f;
        let mut flags = 0x00;
        flags |= Self::select_flag(zero, ZERO_FLAG, alu, current);
        flags |= Self::select_flag(sub, SUB_FLAG, alu, current);
        flags |= Self::select_flag(half, HALF_FLAG, alu, current);
        flags |= Self::select_flag(carry, CARRY_FLAG, alu, current);
        self.f = flags;
    }

    fn select_flag(src: FlagSrc, mask: u8, alu: u8, current: u8) -> u8 {
        match src {
            FlagSrc::Clear => 0x00,
            FlagSrc::Set => mask,
            FlagSrc::Alu => alu & mask,
            FlagSrc::Cpu => current & mask,
        }
    }

    // register pairs

    #[inline(always)]
    pub fn af(&self) -> u16 {
        ((self.a as u16) << 8) | self.f as u16
    }

    #[inline(always)]
    pub fn set_af(&mut self, value: u16) {
        self.a = (value >> 8) as u8;
        self.set_f(value as u8);
    }

    #[inline(always)]
    pub fn bc(&self) -> u16 {
        ((self.b as u16) << 8) | self.c as u16
    }

    #[inline(always)]
    pub fn set_bc(&mut self, value: u16) {
        self.b = (value >> 8) as u8;
        self.c = value as u8;
    }

    #[inline(always)]
    pub fn de(&self) -> u16 {
        ((self.d as u16) << 8) | self.e as u16
    }

    #[inline(always)]
    pub fn set_de(&mut self, value: u16) {
        self.d = (value >> 8) as u8;
        self.e = value as u8;
    }

    #[inline(always)]
    pub fn hl(&self) -> u16 {
        ((self.h as u16) << 8) | self.l as u16
    }

    #[inline(always)]
    pub fn set_hl(&mut self, value: u16) {
        self.h = (value >> 8) as u8;
        self.l = value as u8;
    }

    // interrupt plumbing

    #[inline(always)]
    pub fn interrupt_enable(&self) -> u8 {
        self.ie.get(0)
    }

    #[inline(always)]
    pub fn interrupt_flag(&self) -> u8 {
        self.iflag.get(0)
    }

    #[inline(always)]
    pub fn set_interrupt_flag(&mut self, value: u8) {
        self.iflag.set(0, value);
    }

    /// Latches the given interrupt in the IF register. Whether it is
    /// serviced depends on IE and IME at the next cycle.
    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        self.iflag.set(0, self.iflag.get(0) | interrupt.mask());
    }

    // state accessors

    #[inline(always)]
    pub fn bus(&mut self) -> &mut Bus {
        &mut self.bus
    }

    #[inline(always)]
    pub fn bus_i(&self) -> &Bus {
        &self.bus
    }

    #[inline(always)]
    pub fn ime(&self) -> bool {
        self.ime
    }

    #[inline(always)]
    pub fn set_ime(&mut self, value: bool) {
        self.ime = value;
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.halted
    }

    #[inline(always)]
    pub fn idle_time(&self) -> u32 {
        self.idle_time
    }

    #[inline(always)]
    pub fn write_listener(&self) -> u16 {
        self.write_listener
    }

    pub fn description(&self, desc: &OpDesc, inst_pc: u16) -> String {
        let title = format!("[0x{:04x}] {}", inst_pc, desc.mnemonic);
        let timing = format!("({} cycles)", desc.cycles);
        let registers = format!(
            "[PC=0x{:04x} SP=0x{:04x}] [A=0x{:02x} B=0x{:02x} C=0x{:02x} D=0x{:02x} E=0x{:02x} H=0x{:02x} L=0x{:02x}]",
            self.pc, self.sp, self.a, self.b, self.c, self.d, self.e, self.h, self.l
        );
        format!("{title: <24} {timing: <11} {registers}")
    }
}

impl Display for Cpu {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[PC=0x{:04x} SP=0x{:04x}] [AF=0x{:04x} BC=0x{:04x} DE=0x{:04x} HL=0x{:04x}]",
            self.pc,
            self.sp,
            self.af(),
            self.bc(),
            self.de(),
            self.hl()
        )
    }
}
