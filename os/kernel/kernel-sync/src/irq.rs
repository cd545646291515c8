use crate::{Mutex, MutexGuard, RawLock, RawUnlock};
use core::ops::{Deref, DerefMut};

/// A mutex guard that also disables interrupts while held.
///
/// `IrqMutex` combines an interrupt guard with a regular [`MutexGuard`].
/// When created via [`Mutex::lock_irq`], it:
///
/// 1. saves the current interrupt state and disables interrupts, and
/// 2. acquires the underlying mutex,
///
/// releasing them in reverse order on drop: the lock first, then the
/// interrupt state.
///
/// This prevents interrupt handlers from preempting the critical section
/// and re-entering code that uses the same lock.
///
/// # Examples
///
/// ```
/// use kernel_sync::SpinMutex;
///
/// static M: SpinMutex<u64> = SpinMutex::new(0);
///
/// {
///     let mut g = M.lock_irq();
///     *g += 1;
/// }
/// assert_eq!(*M.lock(), 1);
/// ```
pub struct IrqMutex<'a, T, R: RawLock + RawUnlock> {
    // Field order is drop order.
    guard: MutexGuard<'a, T, R>,
    _irq: IrqGuard,
}

impl<T, R: RawLock + RawUnlock> Mutex<T, R> {
    /// Acquires the mutex with interrupts disabled for the guard's lifetime.
    ///
    /// Constructs an [`IrqGuard`] to save and disable interrupts, then spins
    /// for the mutex. Dropping the returned guard releases the mutex and then
    /// restores interrupts if they were previously enabled.
    #[inline]
    pub fn lock_irq(&self) -> IrqMutex<'_, T, R> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqMutex { guard, _irq: irq }
    }
}

impl<T, R: RawLock + RawUnlock> Deref for IrqMutex<'_, T, R> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, R: RawLock + RawUnlock> DerefMut for IrqMutex<'_, T, R> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Hardware interrupt control via `pushfd`, `cli` and `sti`.
///
/// # Safety & Privilege
///
/// These operations must run in a context where `cli`/`sti` are legal
/// (ring 0).
#[cfg(all(target_os = "none", target_arch = "x86"))]
mod platform {
    use kernel_registers::LoadRegister;
    use kernel_registers::eflags::Eflags;

    #[inline]
    pub fn interrupts_enabled() -> bool {
        Eflags::load().if_interrupt_enable()
    }

    #[inline]
    pub fn disable() {
        unsafe { core::arch::asm!("cli", options(nomem, nostack)) }
    }

    #[inline]
    pub fn enable() {
        unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
    }
}

/// Software interrupt flag for hosted builds.
///
/// Mirrors the semantics of the `IF` flag for a single simulated core so the
/// locking paths can run on the host.
#[cfg(not(all(target_os = "none", target_arch = "x86")))]
mod platform {
    use core::sync::atomic::{AtomicBool, Ordering};

    static ENABLED: AtomicBool = AtomicBool::new(true);

    #[inline]
    pub fn interrupts_enabled() -> bool {
        ENABLED.load(Ordering::Acquire)
    }

    #[inline]
    pub fn disable() {
        ENABLED.store(false, Ordering::Release);
    }

    #[inline]
    pub fn enable() {
        ENABLED.store(true, Ordering::Release);
    }
}

/// Returns whether local interrupts are currently enabled.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    platform::interrupts_enabled()
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt-enable flag. If interrupts were
/// enabled, it disables them. On drop, it re-enables them **only** if they
/// were previously enabled, so guards nest.
///
/// # Examples
///
/// ```
/// use kernel_sync::irq::{IrqGuard, interrupts_enabled};
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     // critical section
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = platform::interrupts_enabled();
        if enabled {
            platform::disable();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            platform::enable();
        }
    }
}
