// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Hand-off to the active image.

use fieldboot_common::boot::BootVector;

/// Relocate the vector table and jump to a validated image.
///
/// # Safety
/// `vector` must come from `VectorTable::validate` on the region it names.
/// Nothing from the bootloader survives the jump.
pub unsafe fn boot(vector: BootVector) -> ! {
    quiesce_interrupts();

    relocate_vector_table(vector.vector_table);

    jump_to_firmware(vector.stack_pointer, vector.entry);
}

/// Leave the NVIC as reset left it: nothing enabled, nothing pending.
/// Clocks stay as configured.
unsafe fn quiesce_interrupts() {
    cortex_m::interrupt::disable();

    const NVIC_ICER: *mut u32 = 0xE000_E180 as *mut u32;
    const NVIC_ICPR: *mut u32 = 0xE000_E280 as *mut u32;
    NVIC_ICER.write_volatile(0xFFFF_FFFF);
    NVIC_ICPR.write_volatile(0xFFFF_FFFF);
}

unsafe fn relocate_vector_table(base: u32) {
    const SCB_VTOR: *mut u32 = 0xE000_ED08 as *mut u32;
    SCB_VTOR.write_volatile(base);

    cortex_m::asm::dsb();
    cortex_m::asm::isb();
}

/// Load `initial_sp` into MSP and branch to `reset_vector`. Never returns.
unsafe fn jump_to_firmware(initial_sp: u32, reset_vector: u32) -> ! {
    core::arch::asm!(
        "msr msp, {sp}",
        "cpsie i", // images start with PRIMASK clear
        "bx {reset}",
        sp = in(reg) initial_sp,
        reset = in(reg) reset_vector,
        options(noreturn)
    );
}
