//! Helpers for building emulator instances in controlled states,
//! used by the test suites and the benchmarks.

use busboy_common::error::Error;

use crate::{
    boot::BOOT_SIZE,
    gb::GameBoy,
    rom::CARTRIDGE_SIZE,
};

#[derive(Default)]
pub struct TestOptions {
    /// Cartridge image to load; a NOP-filled no-MBC image when unset.
    pub rom: Option<Vec<u8>>,

    /// Replacement boot ROM image, for tests that drive the boot
    /// sequence itself.
    pub boot_image: Option<[u8; BOOT_SIZE]>,

    /// Whether to jump straight to the post-boot state (the default).
    pub skip_boot: Option<bool>,
}

/// A 32 KiB no-MBC cartridge image filled with NOPs.
pub fn nop_rom() -> Vec<u8> {
    vec![0x00; CARTRIDGE_SIZE]
}

pub fn build_test(options: TestOptions) -> GameBoy {
    let rom = options.rom.unwrap_or_else(nop_rom);
    let mut gb = GameBoy::from_data(&rom).unwrap();
    if let Some(image) = options.boot_image {
        gb.load_boot(&image).unwrap();
    }
    if options.skip_boot.unwrap_or(true) {
        gb.skip_boot().unwrap();
    }
    gb
}

/// Builds a post-boot machine for the given ROM and runs it for the
/// requested number of cycles.
pub fn run_test(rom: &[u8], cycles: u64) -> Result<GameBoy, Error> {
    let mut gb = GameBoy::from_data(rom)?;
    gb.skip_boot()?;
    gb.run_until(cycles)?;
    Ok(gb)
}

#[cfg(test)]
mod tests {
    use crate::{
        boot::BOOT_SIZE,
        consts::{TAC_ADDR, TIMA_ADDR, TMA_ADDR},
        cpu::Interrupt,
    };

    use super::{build_test, nop_rom, run_test, TestOptions};

    #[test]
    fn test_bootrom_handoff() {
        // minimal boot program: jump to the tail of the image, store
        // 0x01 to the disable register and fall off at 0x0100
        let mut image = [0x00u8; BOOT_SIZE];
        image[0x00] = 0xc3; // JP 0x00fc
        image[0x01] = 0xfc;
        image[0x02] = 0x00;
        image[0xfc] = 0x3e; // LD A, 0x01
        image[0xfd] = 0x01;
        image[0xfe] = 0xe0; // LDH [0x50], A
        image[0xff] = 0x50;

        let mut rom = nop_rom();
        rom[0x0000] = 0x42;

        let mut gb = build_test(TestOptions {
            rom: Some(rom),
            boot_image: Some(image),
            skip_boot: Some(false),
        });
        assert!(gb.boot());
        assert_eq!(gb.bus_i().read(0x0000), 0xc3);

        // JP (4) + LD (2) + LDH (3) machine cycles
        gb.run_until(9).unwrap();
        assert!(!gb.boot());
        assert_eq!(gb.bus_i().read(0x0000), 0x42);
        assert_eq!(gb.cpu_i().pc, 0x0100);

        // a second disable write must change nothing
        gb.cpu().write_at(0xff50, 0x01).unwrap();
        gb.bootrom_bus_listener(0xff50).unwrap();
        assert!(!gb.boot());
        assert_eq!(gb.bus_i().read(0x0000), 0x42);
    }

    #[test]
    fn test_timer_overflow_raises_interrupt() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(TIMA_ADDR, 0xfe).unwrap();
        gb.bus().write(TMA_ADDR, 0x42).unwrap();
        gb.bus().write(TAC_ADDR, 0x05).unwrap();

        // two falling edges of counter bit 3: 0xfe -> 0xff -> reload
        gb.run_until(8).unwrap();
        assert_eq!(gb.bus_i().read(TIMA_ADDR), 0x42);
        assert_eq!(gb.cpu_i().interrupt_flag() & 0x04, 0x04);
    }

    #[test]
    fn test_interrupt_dispatch_through_driver() {
        let mut gb = build_test(TestOptions::default());
        gb.cpu().set_ime(true);
        gb.bus().write(0xffff, 0x01).unwrap();
        gb.request_interrupt(Interrupt::VBlank);

        gb.run_until(1).unwrap();
        assert!(!gb.cpu_i().ime());
        assert_eq!(gb.cpu_i().interrupt_flag() & 0x01, 0x00);
        assert_eq!(gb.cpu_i().sp, 0xfffc);
        assert_eq!(gb.bus_i().read16(0xfffc), 0x0100);
        assert_eq!(gb.cpu_i().pc, 0x0040);
        assert_eq!(gb.cpu_i().idle_time(), 5);
    }

    #[test]
    fn test_halt_wakes_without_dispatch() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(0xffff, 0x04).unwrap();
        gb.bus().write(0xc000, 0x76).unwrap();
        gb.cpu().pc = 0xc000;

        gb.run_until(1).unwrap();
        assert!(gb.cpu_i().halted());
        assert_eq!(gb.cpu_i().pc, 0xc001);

        // no pending interrupt, the CPU stays put
        gb.run_until(2).unwrap();
        assert!(gb.cpu_i().halted());
        assert_eq!(gb.cpu_i().pc, 0xc001);

        // latching the timer interrupt releases the halt, but with
        // IME off the vector is never taken
        gb.request_interrupt(Interrupt::Timer);
        gb.run_until(3).unwrap();
        assert!(!gb.cpu_i().halted());
        assert_eq!(gb.cpu_i().pc, 0xc002);
        assert_eq!(gb.cpu_i().interrupt_flag() & 0x04, 0x04);
    }

    #[test]
    fn test_push_pop_round_trip() {
        let mut gb = build_test(TestOptions::default());
        gb.cpu().set_bc(0x1234);
        gb.cpu().pc = 0xc000;
        gb.bus().write(0xc000, 0xc5).unwrap(); // PUSH BC
        gb.bus().write(0xc001, 0xd1).unwrap(); // POP DE

        gb.run_until(7).unwrap();
        assert_eq!(gb.cpu_i().de(), 0x1234);
        assert_eq!(gb.cpu_i().sp, 0xfffe);
        assert_eq!(gb.bus_i().read(0xfffc), 0x34);
        assert_eq!(gb.bus_i().read(0xfffd), 0x12);
    }

    #[test]
    fn test_run_test_program() {
        let mut rom = nop_rom();
        rom[0x0100] = 0x3e; // LD A, 0x42
        rom[0x0101] = 0x42;
        rom[0x0102] = 0xea; // LD [0xc000], A
        rom[0x0103] = 0x00;
        rom[0x0104] = 0xc0;
        rom[0x0105] = 0x18; // JR -2 (spin)
        rom[0x0106] = 0xfe;

        let gb = run_test(&rom, 30).unwrap();
        assert_eq!(gb.bus_i().read(0xc000), 0x42);
        assert_eq!(gb.cpu_i().a, 0x42);
        assert_eq!(gb.cycles(), 30);
    }
}
