#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![feature(abi_x86_interrupt)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;

#[macro_use]
mod print;

mod arch;
mod config;
mod elf;
mod error;
mod fixed_point;
mod fs;
mod mm;
mod process;
mod sched;
mod serial;
mod sync;
mod syscall;
mod util;

/// Path `_start` execs once every subsystem is up (spec.md C10's
/// implicit "init" process).
const INIT_PROGRAM: &str = "/init";

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    #[cfg(target_arch = "x86_64")]
    println!("[KERNEL PANIC] {}", _info);

    arch::halt();
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    serial_println!("[KERNEL PANIC] {}", info);
    exit_qemu(QemuExitCode::Failed);
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    println!("VeridianOS kernel v{}", env!("CARGO_PKG_VERSION"));
    println!("Initializing kernel subsystems...");

    arch::init();
    mm::init();
    sched::init();
    fs::init();
    process::init();

    #[cfg(test)]
    test_main();

    match process::spawn_init(INIT_PROGRAM) {
        Ok(tid) => println!("init process started: {tid:?}"),
        Err(e) => println!("failed to start init process: {e}"),
    }

    arch::halt();
}

#[cfg(test)]
fn test_runner(tests: &[&dyn Testable]) {
    serial_println!("Running {} tests", tests.len());
    for test in tests {
        test.run();
    }
    exit_qemu(QemuExitCode::Success);
}

#[cfg(test)]
trait Testable {
    fn run(&self) -> ();
}

#[cfg(test)]
impl<T> Testable for T
where
    T: Fn(),
{
    fn run(&self) {
        serial_print!("{}...\t", core::any::type_name::<T>());
        self();
        serial_println!("[ok]");
    }
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum QemuExitCode {
    Success = 0x10,
    Failed = 0x11,
}

#[cfg(test)]
pub fn exit_qemu(exit_code: QemuExitCode) -> ! {
    use x86_64::instructions::port::Port;

    unsafe {
        let mut port = Port::new(0xf4);
        port.write(exit_code as u32);
    }
    unreachable!();
}
