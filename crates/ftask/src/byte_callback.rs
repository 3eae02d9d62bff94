#![forbid(unsafe_code)]

//! Allocate-then-commit callbacks for handing one reusable byte buffer from a
//! producer to a consumer.
//!
//! # Protocol
//!
//! ```text
//! producer                         consumer (functions behind the callback)
//!   allocate(n)        ───────────▶  allocate(n) -> B   (buffer with room for n bytes)
//!   write ≤ n bytes into B
//!   invoke(written)    ───────────▶  invoke(written)    (consume `written` bytes)
//! ```
//!
//! # Invariants
//!
//! 1. Only the most recent [`Allocation`] is valid. A new `allocate`, an
//!    `invoke`, a `replace`, or a `revoke` supersedes it; its
//!    [`Allocation::buffer`] then fails with [`ErrorKind::StaleAllocation`].
//! 2. `invoke` requires an outstanding allocation ([`ErrorKind::NotAllocated`])
//!    and may not commit more bytes than were allocated
//!    ([`ErrorKind::InvalidArgument`]).
//! 3. The callback counts as revoked when either function is missing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::error::{ErrorKind, TaskError};

type AllocateFn<B> = Rc<dyn Fn(ByteLength) -> B>;
type InvokeFn = Rc<dyn Fn(ByteLength)>;

/// A validated byte count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteLength(usize);

impl ByteLength {
    #[must_use]
    pub const fn new(len: usize) -> Self {
        Self(len)
    }

    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for ByteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl From<usize> for ByteLength {
    fn from(len: usize) -> Self {
        Self(len)
    }
}

/// Host numbers (JS `number`) must be finite, integral, and non-negative.
impl TryFrom<f64> for ByteLength {
    type Error = TaskError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let invalid = |why: &str| {
            TaskError::new(
                "ByteLength::try_from",
                ErrorKind::InvalidArgument(format!("byte length {value} {why}")),
            )
        };
        if !value.is_finite() {
            return Err(invalid("is not finite"));
        }
        if value.fract() != 0.0 {
            return Err(invalid("must be an integer"));
        }
        if value < 0.0 {
            return Err(invalid("must not be negative"));
        }
        if value > usize::MAX as f64 {
            return Err(invalid("is too large"));
        }
        Ok(Self(value as usize))
    }
}

impl TryFrom<i64> for ByteLength {
    type Error = TaskError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        usize::try_from(value).map(Self).map_err(|_| {
            TaskError::new(
                "ByteLength::try_from",
                ErrorKind::InvalidArgument(format!("byte length {value} must not be negative")),
            )
        })
    }
}

enum Field<T> {
    Unset,
    Cleared,
    Set(T),
}

impl<T> Field<T> {
    fn resolve(self, name: &'static str, function: &'static str) -> Result<Option<T>, TaskError> {
        match self {
            Self::Unset => Err(TaskError::new(function, ErrorKind::MissingField(name))),
            Self::Cleared => Ok(None),
            Self::Set(value) => Ok(Some(value)),
        }
    }
}

/// Typed construction parameter for byte callbacks.
///
/// Both slots must be specified, either with a function or explicitly
/// cleared.
pub struct ByteCallbackConfig<B> {
    allocate: Field<AllocateFn<B>>,
    invoke: Field<InvokeFn>,
}

impl<B> fmt::Debug for ByteCallbackConfig<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn state<T>(field: &Field<T>) -> &'static str {
            match field {
                Field::Unset => "unset",
                Field::Cleared => "cleared",
                Field::Set(_) => "set",
            }
        }
        f.debug_struct("ByteCallbackConfig")
            .field("allocate", &state(&self.allocate))
            .field("invoke", &state(&self.invoke))
            .finish()
    }
}

impl<B: 'static> Default for ByteCallbackConfig<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: 'static> ByteCallbackConfig<B> {
    /// Empty configuration; both slots still need to be specified.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocate: Field::Unset,
            invoke: Field::Unset,
        }
    }

    /// Both functions at once.
    #[must_use]
    pub fn with_fns(
        allocate: impl Fn(ByteLength) -> B + 'static,
        invoke: impl Fn(ByteLength) + 'static,
    ) -> Self {
        Self::new().allocate(allocate).invoke(invoke)
    }

    /// Both slots cleared.
    #[must_use]
    pub fn revoked() -> Self {
        Self::new().clear_allocate().clear_invoke()
    }

    #[must_use]
    pub fn allocate(mut self, allocate: impl Fn(ByteLength) -> B + 'static) -> Self {
        self.allocate = Field::Set(Rc::new(allocate));
        self
    }

    #[must_use]
    pub fn invoke(mut self, invoke: impl Fn(ByteLength) + 'static) -> Self {
        self.invoke = Field::Set(Rc::new(invoke));
        self
    }

    #[must_use]
    pub fn clear_allocate(mut self) -> Self {
        self.allocate = Field::Cleared;
        self
    }

    #[must_use]
    pub fn clear_invoke(mut self) -> Self {
        self.invoke = Field::Cleared;
        self
    }

    fn resolve(self, function: &'static str) -> Result<Functions<B>, TaskError> {
        Ok(Functions {
            allocate: self.allocate.resolve("allocate", function)?,
            invoke: self.invoke.resolve("invoke", function)?,
        })
    }
}

struct Functions<B> {
    allocate: Option<AllocateFn<B>>,
    invoke: Option<InvokeFn>,
}

impl<B> Clone for Functions<B> {
    fn clone(&self) -> Self {
        Self {
            allocate: self.allocate.clone(),
            invoke: self.invoke.clone(),
        }
    }
}

impl<B> Functions<B> {
    fn revoked() -> Self {
        Self {
            allocate: None,
            invoke: None,
        }
    }

    fn is_revoked(&self) -> bool {
        self.allocate.is_none() || self.invoke.is_none()
    }
}

struct ByteSlot<B> {
    functions: RefCell<Functions<B>>,
    /// Bumped whenever the outstanding allocation is superseded.
    generation: Rc<Cell<u64>>,
    outstanding: Cell<Option<ByteLength>>,
}

impl<B> ByteSlot<B> {
    fn invalidate(&self) -> u64 {
        let next = self.generation.get().wrapping_add(1);
        self.generation.set(next);
        self.outstanding.set(None);
        next
    }

    fn set(&self, functions: Functions<B>) {
        *self.functions.borrow_mut() = functions;
        self.invalidate();
    }
}

/// A buffer handed out by [`ByteCallback::allocate`].
pub struct Allocation<B> {
    buffer: B,
    byte_length: ByteLength,
    generation: u64,
    current: Rc<Cell<u64>>,
}

impl<B> fmt::Debug for Allocation<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("byte_length", &self.byte_length)
            .field("current", &self.is_current())
            .finish_non_exhaustive()
    }
}

impl<B> Allocation<B> {
    #[must_use]
    pub fn byte_length(&self) -> ByteLength {
        self.byte_length
    }

    /// Whether this is still the callback's outstanding allocation.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.current.get() == self.generation
    }

    /// The buffer to write into.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::StaleAllocation`] once the allocation has been superseded.
    pub fn buffer(&self) -> Result<&B, TaskError> {
        if self.is_current() {
            Ok(&self.buffer)
        } else {
            Err(TaskError::new(
                "Allocation::buffer",
                ErrorKind::StaleAllocation,
            ))
        }
    }
}

/// Read-only facade over an allocate/invoke function pair.
pub struct ByteCallback<B> {
    slot: Rc<ByteSlot<B>>,
}

impl<B> Clone for ByteCallback<B> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<B> fmt::Debug for ByteCallback<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteCallback")
            .field("revoked", &self.slot.functions.borrow().is_revoked())
            .field("outstanding", &self.slot.outstanding.get())
            .finish()
    }
}

impl<B: 'static> ByteCallback<B> {
    #[must_use]
    pub fn new(
        allocate: impl Fn(ByteLength) -> B + 'static,
        invoke: impl Fn(ByteLength) + 'static,
    ) -> Self {
        Self::from_functions(Functions {
            allocate: Some(Rc::new(allocate)),
            invoke: Some(Rc::new(invoke)),
        })
    }

    #[must_use]
    pub fn revoked() -> Self {
        Self::from_functions(Functions::revoked())
    }

    /// # Errors
    ///
    /// [`ErrorKind::MissingField`] when a slot was left unspecified.
    pub fn from_config(config: ByteCallbackConfig<B>) -> Result<Self, TaskError> {
        Ok(Self::from_functions(
            config.resolve("ByteCallback::from_config")?,
        ))
    }

    fn from_functions(functions: Functions<B>) -> Self {
        Self {
            slot: Rc::new(ByteSlot {
                functions: RefCell::new(functions),
                generation: Rc::new(Cell::new(0)),
                outstanding: Cell::new(None),
            }),
        }
    }

    /// Ask the consumer for a buffer with room for `byte_length` bytes.
    /// Supersedes any earlier allocation.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::Revoked`] when the allocate function is missing.
    pub fn allocate(&self, byte_length: impl Into<ByteLength>) -> Result<Allocation<B>, TaskError> {
        let allocate = self
            .slot
            .functions
            .borrow()
            .allocate
            .clone()
            .ok_or_else(|| TaskError::new("ByteCallback::allocate", ErrorKind::Revoked))?;
        let byte_length = byte_length.into();
        let buffer = allocate(byte_length);
        let generation = self.slot.invalidate();
        self.slot.outstanding.set(Some(byte_length));
        trace!(%byte_length, generation, "byte buffer allocated");
        Ok(Allocation {
            buffer,
            byte_length,
            generation,
            current: Rc::clone(&self.slot.generation),
        })
    }

    /// Commit `byte_length` bytes of the outstanding allocation to the
    /// consumer. The allocation is invalid afterwards.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Revoked`] when the invoke function is missing.
    /// - [`ErrorKind::NotAllocated`] without an outstanding allocation.
    /// - [`ErrorKind::InvalidArgument`] when committing more than was allocated.
    pub fn invoke(&self, byte_length: impl Into<ByteLength>) -> Result<(), TaskError> {
        const FUNCTION: &str = "ByteCallback::invoke";
        let invoke = self
            .slot
            .functions
            .borrow()
            .invoke
            .clone()
            .ok_or_else(|| TaskError::new(FUNCTION, ErrorKind::Revoked))?;
        let byte_length = byte_length.into();
        let Some(allocated) = self.slot.outstanding.get() else {
            return Err(TaskError::new(FUNCTION, ErrorKind::NotAllocated));
        };
        if byte_length > allocated {
            return Err(TaskError::new(
                FUNCTION,
                ErrorKind::InvalidArgument(format!(
                    "committing {byte_length} from an allocation of {allocated}"
                )),
            ));
        }
        self.slot.invalidate();
        trace!(%byte_length, "byte buffer committed");
        invoke(byte_length);
        Ok(())
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.slot.functions.borrow().is_revoked()
    }

    /// Byte length of the outstanding allocation, if any.
    #[must_use]
    pub fn outstanding(&self) -> Option<ByteLength> {
        self.slot.outstanding.get()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

/// Owner of a [`ByteCallback`]'s slots.
pub struct ByteCallbackController<B> {
    callback: ByteCallback<B>,
}

impl<B> fmt::Debug for ByteCallbackController<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteCallbackController")
            .field("callback", &self.callback)
            .finish()
    }
}

impl<B: 'static> ByteCallbackController<B> {
    /// # Errors
    ///
    /// [`ErrorKind::MissingField`] when a slot was left unspecified.
    pub fn new(config: ByteCallbackConfig<B>) -> Result<Self, TaskError> {
        ByteCallback::from_config(config)
            .map(|callback| Self { callback })
            .map_err(|e| e.context("ByteCallbackController::new"))
    }

    #[must_use]
    pub fn callback(&self) -> ByteCallback<B> {
        self.callback.clone()
    }

    /// Swap both functions. Any outstanding allocation is invalidated.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::MissingField`] when a slot was left unspecified; the
    /// callback is left unchanged.
    pub fn replace(&self, config: ByteCallbackConfig<B>) -> Result<(), TaskError> {
        let functions = config.resolve("ByteCallbackController::replace")?;
        debug!(revoked = functions.is_revoked(), "byte callback replaced");
        self.callback.slot.set(functions);
        Ok(())
    }

    pub fn revoke(&self) {
        self.callback.slot.set(Functions::revoked());
    }

    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.callback.is_revoked()
    }
}

/// Byte-callback controller that keeps at most one live facade.
pub struct UniqueByteCallbackController<B> {
    functions: Functions<B>,
    current: ByteCallback<B>,
}

impl<B> fmt::Debug for UniqueByteCallbackController<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueByteCallbackController")
            .field("revoked", &self.functions.is_revoked())
            .field("current", &self.current)
            .finish()
    }
}

impl<B: 'static> UniqueByteCallbackController<B> {
    /// # Errors
    ///
    /// [`ErrorKind::MissingField`] when a slot was left unspecified.
    pub fn new(config: ByteCallbackConfig<B>) -> Result<Self, TaskError> {
        Ok(Self {
            functions: config.resolve("UniqueByteCallbackController::new")?,
            current: ByteCallback::revoked(),
        })
    }

    /// Mint a new facade over the current functions, revoking the previous
    /// one.
    pub fn callback(&mut self) -> ByteCallback<B> {
        let fresh = ByteCallback::from_functions(self.functions.clone());
        self.current.slot.set(Functions::revoked());
        self.current = fresh.clone();
        debug!("unique byte callback reissued");
        fresh
    }

    /// # Errors
    ///
    /// [`ErrorKind::MissingField`] when a slot was left unspecified; nothing
    /// changes in that case.
    pub fn replace(&mut self, config: ByteCallbackConfig<B>) -> Result<(), TaskError> {
        self.functions = config.resolve("UniqueByteCallbackController::replace")?;
        self.current.slot.set(self.functions.clone());
        Ok(())
    }

    pub fn revoke(&mut self) {
        self.functions = Functions::revoked();
        self.current.slot.set(Functions::revoked());
    }
}
