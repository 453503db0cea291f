//! End-to-end tests that execute emitted code on the host.
//!
//! These only run on 64-bit x86 Unix hosts, where the System V convention
//! is the `extern "C"` default.

#![cfg(all(target_arch = "x86_64", unix))]

use runasm::Register::*;
use runasm::{instruction, label, mem, Arch, AssemblyUnit, CallConv, CodePage, Instruction};

const MODE: Arch = Arch::X86_64;

fn ins(mnemonic: &str, ops: Vec<runasm::Operand>) -> Instruction {
    instruction(mnemonic, ops, MODE).unwrap()
}

#[test]
fn constant_function() {
    let mut unit = AssemblyUnit::new(MODE);
    unit.push(ins("mov", vec![Eax.into(), 42.into()])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn() -> i32>(CallConv::host()) };
    assert_eq!((f.get())(), 42);
}

#[test]
fn two_argument_add() {
    // System V: arguments arrive in edi, esi.
    let mut unit = AssemblyUnit::new(MODE);
    unit.push(ins("mov", vec![Eax.into(), Edi.into()])).unwrap();
    unit.push(ins("add", vec![Eax.into(), Esi.into()])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn(i32, i32) -> i32>(CallConv::SystemV) };
    assert_eq!((f.get())(2, 3), 5);
    assert_eq!((f.get())(-10, 4), -6);
}

#[test]
fn loop_with_labels() {
    // Sum 1..=n by counting down.
    let mut unit = AssemblyUnit::new(MODE);
    unit.push(ins("mov", vec![Eax.into(), 0.into()])).unwrap();
    unit.push(ins("mov", vec![Ecx.into(), Edi.into()])).unwrap();
    unit.label("top").unwrap();
    unit.push(ins("test", vec![Ecx.into(), Ecx.into()])).unwrap();
    unit.push(ins("je", vec![label("done")])).unwrap();
    unit.push(ins("add", vec![Eax.into(), Ecx.into()])).unwrap();
    unit.push(ins("dec", vec![Ecx.into()])).unwrap();
    unit.push(ins("jmp", vec![label("top")])).unwrap();
    unit.label("done").unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn(i32) -> i32>(CallConv::SystemV) };
    assert_eq!((f.get())(0), 0);
    assert_eq!((f.get())(1), 1);
    assert_eq!((f.get())(5), 15);
    assert_eq!((f.get())(100), 5050);
}

#[test]
fn stack_frame_round_trip() {
    // Classic prologue/epilogue with a spill to the local frame.
    let mut unit = AssemblyUnit::new(MODE);
    unit.push(ins("push", vec![Rbp.into()])).unwrap();
    unit.push(ins("mov", vec![Rbp.into(), Rsp.into()])).unwrap();
    unit.push(ins("sub", vec![Rsp.into(), 16.into()])).unwrap();
    unit.push(ins("mov", vec![mem(Rbp).disp(-8).into(), Rdi.into()]))
        .unwrap();
    unit.push(ins("mov", vec![Rax.into(), mem(Rbp).disp(-8).into()]))
        .unwrap();
    unit.push(ins("add", vec![Rax.into(), Rax.into()])).unwrap();
    unit.push(ins("leave", vec![])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn(i64) -> i64>(CallConv::SystemV) };
    assert_eq!((f.get())(21), 42);
    assert_eq!((f.get())(-3), -6);
}

#[test]
fn multiple_entry_points() {
    let mut unit = AssemblyUnit::new(MODE);
    unit.label("one").unwrap();
    unit.push(ins("mov", vec![Eax.into(), 1.into()])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    unit.label("two").unwrap();
    unit.push(ins("mov", vec![Eax.into(), 2.into()])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let one = unsafe {
        page.callable_at::<extern "C" fn() -> i32>("one", CallConv::host())
            .unwrap()
    };
    let two = unsafe {
        page.callable_at::<extern "C" fn() -> i32>("two", CallConv::host())
            .unwrap()
    };
    assert_eq!((one.get())(), 1);
    assert_eq!((two.get())(), 2);

    let missing =
        unsafe { page.callable_at::<extern "C" fn() -> i32>("three", CallConv::host()) };
    assert!(missing.is_err());
}

#[test]
fn callable_outlives_page_value() {
    let mut unit = AssemblyUnit::new(MODE);
    unit.push(ins("mov", vec![Eax.into(), 7.into()])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn() -> i32>(CallConv::host()) };
    drop(page);
    assert_eq!((f.get())(), 7);
}

#[test]
fn absolute_label_address() {
    // mov rax, offset data — the patched immediate is the true address.
    let mut unit = AssemblyUnit::new(MODE);
    unit.label("data").unwrap();
    unit.push(ins("mov", vec![Rax.into(), label("data")])).unwrap();
    unit.push(ins("ret", vec![])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn() -> u64>(CallConv::host()) };
    assert_eq!((f.get())(), page.base() as u64);
}

#[test]
fn indirect_call_through_register() {
    // Call a Rust helper through `call rax`.
    extern "C" fn triple(x: i64) -> i64 {
        x * 3
    }
    let mut unit = AssemblyUnit::new(MODE);
    unit.push(ins(
        "mov",
        vec![
            Rax.into(),
            runasm::Operand::Immediate(triple as usize as i64),
        ],
    ))
    .unwrap();
    unit.push(ins("jmp", vec![Rax.into()])).unwrap();
    let page = CodePage::new(&unit.resolve().unwrap()).unwrap();
    let f = unsafe { page.callable::<extern "C" fn(i64) -> i64>(CallConv::SystemV) };
    assert_eq!((f.get())(14), 42);
}
