//! Game Boy emulation entrypoint and associated functions and structures.
//!
//! The [`GameBoy`] driver owns every component of the system and
//! advances it one machine cycle at a time: first the timer, then the
//! CPU, then the write-listener fan-out that lets peripherals react
//! to the address the CPU just stored to.
//!
//! # Examples
//!
//! Creates a [`GameBoy`] from an in-memory cartridge, skips the boot
//! sequence and runs a thousand machine cycles.
//!
//! ```rust
//! use busboy::gb::GameBoy;
//! use busboy::rom::CARTRIDGE_SIZE;
//!
//! let rom = vec![0x00; CARTRIDGE_SIZE];
//! let mut game_boy = GameBoy::from_data(&rom).unwrap();
//! game_boy.skip_boot().unwrap();
//! game_boy.run_until(1_000).unwrap();
//! assert_eq!(game_boy.cycles(), 1_000);
//! ```

use busboy_common::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::{
    boot::Bootrom,
    bus::Bus,
    consts::{
        BOOT_DISABLE_ADDR, ECHO_END_ADDR, ECHO_START_ADDR, ERAM_END_ADDR, ERAM_SIZE,
        ERAM_START_ADDR, IO_END_ADDR, IO_SIZE, IO_START_ADDR, OAM_END_ADDR, OAM_SIZE,
        OAM_START_ADDR, UNUSED_END_ADDR, UNUSED_SIZE, UNUSED_START_ADDR, VRAM_END_ADDR, VRAM_SIZE,
        VRAM_START_ADDR, WRAM_END_ADDR, WRAM_SIZE, WRAM_START_ADDR,
    },
    cpu::{Cpu, Interrupt},
    debugln,
    info::Info,
    mem::Component,
    rom::Cartridge,
    timer::Timer,
};

pub struct GameBoy {
    /// The CPU, which also owns the memory bus and the devices that
    /// live inside the processor package.
    cpu: Cpu,

    timer: Timer,
    cartridge: Cartridge,
    bootrom: Bootrom,

    // plain RAM components of the system board
    wram: Component,
    echo: Component,
    vram: Component,
    eram: Component,
    oam: Component,
    unused: Component,
    io: Component,

    /// Set while the boot ROM overlays cartridge bank 0; cleared for
    /// good by the first write to the disable register.
    boot: bool,

    /// Number of machine cycles executed so far.
    cycles: u64,
}

impl GameBoy {
    /// The logic frequency of the Game Boy CPU in machine cycles
    /// per second.
    pub const CPU_FREQ: u32 = 1048576;

    pub fn new(path: &str) -> Result<Self, Error> {
        Self::build(Cartridge::from_file(path)?)
    }

    pub fn from_data(data: &[u8]) -> Result<Self, Error> {
        Self::build(Cartridge::from_data(data)?)
    }

    fn build(mut cartridge: Cartridge) -> Result<Self, Error> {
        let mut bus = Bus::new();

        let mut wram = Component::new(WRAM_SIZE);
        let mut echo = Component::shared(&wram);
        let mut io = Component::new(IO_SIZE);
        let mut eram = Component::new(ERAM_SIZE);
        let mut vram = Component::new(VRAM_SIZE);
        let mut oam = Component::new(OAM_SIZE);
        let mut unused = Component::new(UNUSED_SIZE);
        let mut bootrom = Bootrom::new();

        bus.plug(&mut wram, WRAM_START_ADDR, WRAM_END_ADDR)?;
        bus.plug(&mut echo, ECHO_START_ADDR, ECHO_END_ADDR)?;
        bus.plug(&mut io, IO_START_ADDR, IO_END_ADDR)?;
        bus.plug(&mut eram, ERAM_START_ADDR, ERAM_END_ADDR)?;
        bus.plug(&mut vram, VRAM_START_ADDR, VRAM_END_ADDR)?;
        bus.plug(&mut oam, OAM_START_ADDR, OAM_END_ADDR)?;
        bus.plug(&mut unused, UNUSED_START_ADDR, UNUSED_END_ADDR)?;

        // the cartridge claims both ROM banks first, then the boot
        // ROM overlays bank 0 until the disable write hands it back
        cartridge.plug(&mut bus)?;
        bootrom.plug(&mut bus)?;

        let mut cpu = Cpu::new(bus);
        cpu.plug()?;

        Ok(Self {
            cpu,
            timer: Timer::new(),
            cartridge,
            bootrom,
            wram,
            echo,
            vram,
            eram,
            oam,
            unused,
            io,
            boot: true,
            cycles: 0,
        })
    }

    /// Runs the system until the given absolute cycle count has been
    /// reached, aborting on the first error and leaving the machine
    /// in its partially advanced state.
    pub fn run_until(&mut self, cycle: u64) -> Result<(), Error> {
        while self.cycles < cycle {
            self.timer.cycle(&mut self.cpu)?;
            self.cpu.cycle()?;
            let addr = self.cpu.write_listener();
            if addr != 0 {
                self.timer.bus_listener(&mut self.cpu, addr)?;
                self.bootrom_bus_listener(addr)?;
            }
            self.cycles += 1;
        }
        Ok(())
    }

    /// Reacts to a CPU write on the boot ROM disable register by
    /// handing the overlaid window back to the cartridge. A second
    /// write is a no-op, the transition is one-way per run.
    pub fn bootrom_bus_listener(&mut self, addr: u16) -> Result<(), Error> {
        if addr != BOOT_DISABLE_ADDR {
            return Ok(());
        }
        self.disable_bootrom()
    }

    fn disable_bootrom(&mut self) -> Result<(), Error> {
        if !self.boot {
            return Ok(());
        }
        debugln!("Boot ROM disabled, cartridge bank 0 restored");
        self.cpu.bus().unplug(self.bootrom.component_mut());
        self.cartridge.plug(self.cpu.bus())?;
        self.boot = false;
        Ok(())
    }

    /// Jumps the machine to the state a finished DMG boot sequence
    /// leaves behind: post-boot register values, PC at the cartridge
    /// entrypoint and the boot ROM unplugged.
    pub fn skip_boot(&mut self) -> Result<(), Error> {
        self.cpu.pc = 0x0100;
        self.cpu.sp = 0xfffe;
        self.cpu.a = 0x01;
        self.cpu.set_f(0xb0);
        self.cpu.b = 0x00;
        self.cpu.c = 0x13;
        self.cpu.d = 0x00;
        self.cpu.e = 0xd8;
        self.cpu.h = 0x01;
        self.cpu.l = 0x4d;
        self.disable_bootrom()
    }

    /// Replaces the boot ROM image, e.g. with a purpose-built test
    /// program.
    pub fn load_boot(&mut self, data: &[u8]) -> Result<(), Error> {
        self.bootrom.load(data)
    }

    /// Advances the timer by one machine cycle against the CPU's bus.
    pub fn timer_cycle(&mut self) -> Result<(), Error> {
        self.timer.cycle(&mut self.cpu)
    }

    /// Forwards a written address to the timer's bus listener.
    pub fn timer_listener(&mut self, addr: u16) -> Result<(), Error> {
        self.timer.bus_listener(&mut self.cpu, addr)
    }

    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        self.cpu.request_interrupt(interrupt);
    }

    /// Unplugs every component in reverse plug order, leaving the
    /// whole bus unmapped. The shared echo window goes away without
    /// touching the work RAM bytes behind it.
    pub fn free(&mut self) {
        self.cpu.unplug();
        self.cpu.bus().unplug(self.cartridge.component_mut());
        self.cpu.bus().unplug(self.bootrom.component_mut());
        self.cpu.bus().unplug(&mut self.unused);
        self.cpu.bus().unplug(&mut self.oam);
        self.cpu.bus().unplug(&mut self.vram);
        self.cpu.bus().unplug(&mut self.eram);
        self.cpu.bus().unplug(&mut self.io);
        self.cpu.bus().unplug(&mut self.echo);
        self.cpu.bus().unplug(&mut self.wram);
        self.boot = false;
        self.cycles = 0;
    }

    #[inline(always)]
    pub fn cpu(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    #[inline(always)]
    pub fn cpu_i(&self) -> &Cpu {
        &self.cpu
    }

    #[inline(always)]
    pub fn bus(&mut self) -> &mut Bus {
        self.cpu.bus()
    }

    #[inline(always)]
    pub fn bus_i(&self) -> &Bus {
        self.cpu.bus_i()
    }

    #[inline(always)]
    pub fn timer(&mut self) -> &mut Timer {
        &mut self.timer
    }

    #[inline(always)]
    pub fn timer_i(&self) -> &Timer {
        &self.timer
    }

    #[inline(always)]
    pub fn cartridge_i(&self) -> &Cartridge {
        &self.cartridge
    }

    #[inline(always)]
    pub fn boot(&self) -> bool {
        self.boot
    }

    #[inline(always)]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn description(&self) -> String {
        format!(
            "{} {}\nCartridge  {}\nCycles     {}",
            Info::name(),
            Info::version(),
            self.cartridge,
            self.cycles
        )
    }

    pub fn description_debug(&self) -> String {
        format!("{}\nCPU        {}", self.description(), self.cpu)
    }
}

impl Display for GameBoy {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        boot::DMG_BOOT,
        consts::{IF_ADDR, TAC_ADDR},
        rom::CARTRIDGE_SIZE,
        test::{build_test, TestOptions},
    };

    use super::GameBoy;

    #[test]
    fn test_boot_overlay_visible() {
        let mut rom = vec![0x00; CARTRIDGE_SIZE];
        rom[0x0000] = 0x42;
        let gb = GameBoy::from_data(&rom).unwrap();
        assert!(gb.boot());
        assert_eq!(gb.bus_i().read(0x0000), DMG_BOOT[0]);
        // bank 1 is cartridge-backed even while booting
        assert_eq!(gb.bus_i().read(0x0100), 0x00);
    }

    #[test]
    fn test_skip_boot_state() {
        let mut gb = build_test(TestOptions::default());
        assert!(!gb.boot());
        assert_eq!(gb.cpu_i().pc, 0x0100);
        assert_eq!(gb.cpu_i().sp, 0xfffe);
        assert_eq!(gb.cpu_i().af(), 0x01b0);
        assert_eq!(gb.cpu_i().bc(), 0x0013);
        assert_eq!(gb.cpu_i().de(), 0x00d8);
        assert_eq!(gb.cpu_i().hl(), 0x014d);
        // disabling twice stays a no-op
        gb.skip_boot().unwrap();
        assert!(!gb.boot());
    }

    #[test]
    fn test_run_until_advances_cycles() {
        let mut gb = build_test(TestOptions::default());
        gb.run_until(100).unwrap();
        assert_eq!(gb.cycles(), 100);
        // requesting fewer cycles than already executed is a no-op
        gb.run_until(50).unwrap();
        assert_eq!(gb.cycles(), 100);
    }

    #[test]
    fn test_run_until_drives_timer() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(TAC_ADDR, 0x05).unwrap();
        gb.run_until(8).unwrap();
        // clock select 01 gives one TIMA tick every 4 cycles
        assert_eq!(gb.bus_i().read(0xff05), 0x02);
        assert_eq!(gb.bus_i().read(IF_ADDR), 0x00);
    }

    #[test]
    fn test_echo_ram_mirrors_work_ram() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(0xc123, 0xab).unwrap();
        assert_eq!(gb.bus_i().read(0xe123), 0xab);
        gb.bus().write(0xfdff, 0x77).unwrap();
        assert_eq!(gb.bus_i().read(0xddff), 0x77);
    }

    #[test]
    fn test_free_unmaps_everything() {
        let mut gb = build_test(TestOptions::default());
        gb.bus().write(0xc000, 0x42).unwrap();
        gb.free();
        for addr in [0x0000u16, 0x8000, 0xa000, 0xc000, 0xe000, 0xff05, 0xff80, 0xffff] {
            assert_eq!(gb.bus_i().read(addr), 0xff);
            assert!(gb.bus().write(addr, 0x00).is_err());
        }
    }

    #[test]
    fn test_display() {
        let gb = build_test(TestOptions::default());
        let text = gb.to_string();
        assert!(text.contains("Busboy"));
        assert!(text.contains("ROM Only"));
    }
}
