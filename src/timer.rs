//! The DIV/TIMA timer peripheral.
//!
//! The timer keeps a 16-bit internal counter that advances by 4 every
//! machine cycle; DIV is simply its top 8 bits. TIMA increments on
//! every falling edge of the counter bit selected by TAC, which is
//! what makes a DIV reset or a TAC rewrite able to tick the timer on
//! their own. The memory-mapped registers are plain I/O-page cells
//! accessed through the CPU's bus.

use busboy_common::error::Error;

use crate::{
    bit::{msb8, BitOps},
    consts::{DIV_ADDR, TAC_ADDR, TIMA_ADDR, TMA_ADDR},
    cpu::{Cpu, Interrupt},
};

pub struct Timer {
    /// Internal 16-bit counter; DIV exposes the top byte.
    counter: u16,

    /// Result of the last `timer_state` evaluation, kept so that
    /// register writes can still observe the pre-write level.
    state: bool,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            counter: 0,
            state: false,
        }
    }

    /// Advances the timer by one machine cycle: bumps the counter,
    /// refreshes DIV and applies the falling-edge rule.
    pub fn cycle(&mut self, cpu: &mut Cpu) -> Result<(), Error> {
        let old = self.state;
        self.counter = self.counter.wrapping_add(4);
        cpu.write_at(DIV_ADDR, msb8(self.counter))?;
        self.incr_if_state_change(cpu, old)
    }

    /// Reacts to CPU writes on the timer registers: a DIV write
    /// resets the counter, a TAC write re-evaluates the selected bit.
    /// Both may produce a falling edge and tick TIMA.
    pub fn bus_listener(&mut self, cpu: &mut Cpu, addr: u16) -> Result<(), Error> {
        match addr {
            DIV_ADDR => {
                let old = self.state;
                self.counter = 0;
                cpu.write_at(DIV_ADDR, 0x00)?;
                self.incr_if_state_change(cpu, old)
            }
            TAC_ADDR => {
                let old = self.state;
                self.incr_if_state_change(cpu, old)
            }
            _ => Ok(()),
        }
    }

    /// The level feeding the TIMA trigger: the TAC enable bit ANDed
    /// with the counter bit named by the TAC clock select.
    fn timer_state(&self, cpu: &Cpu) -> bool {
        let tac = cpu.bus_i().read(TAC_ADDR);
        let bit = match tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        };
        tac.bit(2) && (self.counter >> bit) & 0x1 == 0x1
    }

    fn incr_if_state_change(&mut self, cpu: &mut Cpu, old: bool) -> Result<(), Error> {
        self.state = self.timer_state(cpu);
        if !(old && !self.state) {
            return Ok(());
        }
        let tima = cpu.bus_i().read(TIMA_ADDR);
        if tima == 0xff {
            // overflow reloads TIMA from the modulo register and
            // raises the timer interrupt
            let tma = cpu.bus_i().read(TMA_ADDR);
            cpu.write_at(TIMA_ADDR, tma)?;
            cpu.request_interrupt(Interrupt::Timer);
        } else {
            cpu.write_at(TIMA_ADDR, tima + 1)?;
        }
        Ok(())
    }

    #[inline(always)]
    pub fn counter(&self) -> u16 {
        self.counter
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        consts::{DIV_ADDR, TAC_ADDR, TIMA_ADDR, TMA_ADDR},
        test::{build_test, TestOptions},
    };

    #[test]
    fn test_div_increments_every_256_cycles() {
        let mut gb = build_test(TestOptions::default());
        for _ in 0..64 {
            gb.timer_cycle().unwrap();
        }
        assert_eq!(gb.bus_i().read(DIV_ADDR), 0x01);
    }

    #[test]
    fn test_tima_falling_edge_clock_00() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(TAC_ADDR, 0x04).unwrap();
        for _ in 0..255 {
            gb.timer_cycle().unwrap();
        }
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x00);
        gb.timer_cycle().unwrap();
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x01);
    }

    #[test]
    fn test_tima_disabled_never_ticks() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(TAC_ADDR, 0x00).unwrap();
        for _ in 0..2048 {
            gb.timer_cycle().unwrap();
        }
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x00);
    }

    #[test]
    fn test_tima_overflow_reloads_and_interrupts() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(TIMA_ADDR, 0xff).unwrap();
        gb.bus().write(TMA_ADDR, 0x42).unwrap();
        gb.bus().write(TAC_ADDR, 0x05).unwrap();
        // clock select 01 ticks on counter bit 3, one edge per 4 cycles
        for _ in 0..4 {
            gb.timer_cycle().unwrap();
        }
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x42);
        assert_eq!(gb.cpu_i().interrupt_flag() & 0x04, 0x04);
    }

    #[test]
    fn test_div_write_resets_counter() {
        let mut gb = build_test(TestOptions::default());
        for _ in 0..300 {
            gb.timer_cycle().unwrap();
        }
        assert!(gb.timer_i().counter() > 0);
        gb.timer_listener(DIV_ADDR).unwrap();
        assert_eq!(gb.timer_i().counter(), 0);
        assert_eq!(gb.bus_i().read(DIV_ADDR), 0x00);
    }

    #[test]
    fn test_tac_disable_falling_edge() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(TAC_ADDR, 0x05).unwrap();
        // advance until the selected bit (counter bit 3) is high
        for _ in 0..2 {
            gb.timer_cycle().unwrap();
        }
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x00);
        // disabling the timer drops the state line, which counts as
        // a falling edge
        gb.bus().write(TAC_ADDR, 0x01).unwrap();
        gb.timer_listener(TAC_ADDR).unwrap();
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x01);
    }
}
