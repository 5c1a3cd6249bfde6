use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use crate::error::{GlueError, Result};
use crate::guest::Guest;
use crate::value::HostValue;

/// Guest export that forwards `(a, b, args...)` to the closure body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trampoline {
    pub export: Rc<str>,
    pub arity: u32,
    /// Picked by arity rather than named explicitly; may be swapped for a
    /// better match once the callback's use is known.
    pub inferred: bool,
}

impl Trampoline {
    pub fn new(export: impl Into<Rc<str>>, arity: u32) -> Self {
        Self {
            export: export.into(),
            arity,
            inferred: false,
        }
    }

    pub fn inferred(mut self) -> Self {
        self.inferred = true;
        self
    }
}

/// Shared state of one guest closure.
///
/// `a` is the owner pointer (zero while a call is in flight or after
/// disposal), `b` the context pointer, `cnt` the number of outstanding
/// references (the guest's own plus one per running call), `dtor` the
/// destructor's slot in the guest function table.
#[derive(Debug)]
pub struct ClosureState {
    a: Cell<u32>,
    b: u32,
    cnt: Cell<u32>,
    dtor: u32,
}

/// Host-callable wrapper around a guest closure.
///
/// Clones share one [`ClosureState`]; this is what `__wbindgen_closure_wrapper`
/// hands back and what timers, listeners and `onended` hold on to.
#[derive(Clone)]
pub struct Callback {
    state: Rc<ClosureState>,
    trampoline: Rc<Trampoline>,
}

impl Callback {
    pub fn new(a: u32, b: u32, dtor: u32, trampoline: Trampoline) -> Self {
        Self {
            state: Rc::new(ClosureState {
                a: Cell::new(a),
                b,
                cnt: Cell::new(1),
                dtor,
            }),
            trampoline: Rc::new(trampoline),
        }
    }

    pub fn trampoline(&self) -> &Trampoline {
        &self.trampoline
    }

    pub fn ref_count(&self) -> u32 {
        self.state.cnt.get()
    }

    /// Not disposed and not currently running.
    pub fn is_live(&self) -> bool {
        self.state.a.get() != 0
    }

    pub fn is_disposed(&self) -> bool {
        self.state.cnt.get() == 0
    }

    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Same closure, called through a different trampoline.
    pub fn with_trampoline(&self, trampoline: Trampoline) -> Callback {
        Callback {
            state: Rc::clone(&self.state),
            trampoline: Rc::new(trampoline),
        }
    }

    /// Run the guest closure with `args`, each inserted into the handle
    /// table for the guest to take.
    ///
    /// Missing arguments are passed as `undefined` and extra ones dropped, the
    /// way a JavaScript call would.
    pub fn invoke<G: Guest + ?Sized>(&self, g: &mut G, mut args: Vec<HostValue>) -> Result<()> {
        let a = self.state.a.get();
        if a == 0 {
            return Err(GlueError::ClosureUnavailable);
        }
        if args.len() != self.trampoline.arity as usize {
            log::trace!(
                "`{}` takes {} argument(s), got {}",
                self.trampoline.export,
                self.trampoline.arity,
                args.len()
            );
            args.resize(self.trampoline.arity as usize, HostValue::Undefined);
        }

        self.state.cnt.set(self.state.cnt.get() + 1);
        self.state.a.set(0);
        let guard = CallGuard {
            state: &self.state,
            a,
            settled: false,
        };

        let handles: Vec<u32> = args.into_iter().map(|v| g.heap().insert(v)).collect();
        let result = g.call_trampoline(&self.trampoline, a, self.state.b, &handles);
        let settled = guard.settle(g);
        result.and(settled)
    }

    /// Drop one reference (`__wbindgen_cb_drop`).
    ///
    /// Returns `true` when this was the last one: the closure is disposed and
    /// the guest frees its side itself.
    pub fn release(&self) -> bool {
        let cnt = self.state.cnt.get();
        if cnt == 0 {
            log::warn!("closure released after disposal");
            return false;
        }
        self.state.cnt.set(cnt - 1);
        if cnt == 1 {
            self.state.a.set(0);
            return true;
        }
        false
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("a", &self.state.a.get())
            .field("b", &self.state.b)
            .field("cnt", &self.state.cnt.get())
            .field("dtor", &self.state.dtor)
            .field("trampoline", &self.trampoline.export)
            .finish()
    }
}

/// Undoes the in-flight bookkeeping of one call.
///
/// `settle` is the normal exit and may run the destructor. If the call
/// unwinds instead, `Drop` still restores the count; the destructor needs the
/// guest and is skipped with a warning.
struct CallGuard<'s> {
    state: &'s ClosureState,
    a: u32,
    settled: bool,
}

impl CallGuard<'_> {
    fn release(&self) -> bool {
        let cnt = self.state.cnt.get().saturating_sub(1);
        self.state.cnt.set(cnt);
        if cnt == 0 {
            true
        } else {
            self.state.a.set(self.a);
            false
        }
    }

    fn settle<G: Guest + ?Sized>(mut self, g: &mut G) -> Result<()> {
        self.settled = true;
        if self.release() {
            log::debug!("closure {:#x} disposed, running destructor {}", self.a, self.state.dtor);
            g.call_destructor(self.state.dtor, self.a, self.state.b)?;
        }
        Ok(())
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.release() {
            log::warn!(
                "closure {:#x} disposed while unwinding; destructor {} not run",
                self.a,
                self.state.dtor
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Sandbox;
    use std::cell::RefCell;

    fn counter() -> (Rc<RefCell<Vec<Vec<u32>>>>, impl FnMut(&mut Sandbox, &[u32]) -> Result<()>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&seen);
        (seen, move |_: &mut Sandbox, args: &[u32]| {
            log.borrow_mut().push(args.to_vec());
            Ok(())
        })
    }

    #[test]
    fn test_invoke_passes_args_as_handles() {
        let mut sb = Sandbox::new();
        let (seen, body) = counter();
        let cb = sb.closure(1, body);
        cb.invoke(&mut sb, vec![HostValue::from("evt")]).unwrap();

        let calls = seen.borrow();
        assert_eq!(calls.len(), 1);
        let handle = calls[0][0];
        assert_eq!(sb.glue_ref().heap.value(handle).as_str(), Some("evt"));
        assert_eq!(cb.ref_count(), 1);
        assert!(cb.is_live());
        assert!(sb.destroyed().is_empty());
    }

    #[test]
    fn test_release_while_idle() {
        let mut sb = Sandbox::new();
        let (_, body) = counter();
        let cb = sb.closure(0, body);
        assert!(cb.release());
        assert!(cb.is_disposed());
        assert!(matches!(
            cb.invoke(&mut sb, vec![]),
            Err(GlueError::ClosureUnavailable)
        ));
        // The guest frees its own side; the host never calls the destructor.
        assert!(sb.destroyed().is_empty());
        assert!(!cb.release());
    }

    #[test]
    fn test_release_during_call_runs_destructor_once() {
        let mut sb = Sandbox::new();
        let slot: Rc<RefCell<Option<Callback>>> = Rc::new(RefCell::new(None));
        let inner = Rc::clone(&slot);
        let cb = sb.closure(0, move |_, _| {
            let cb = inner.borrow().clone().unwrap();
            assert!(!cb.release(), "call still holds a reference");
            Ok(())
        });
        *slot.borrow_mut() = Some(cb.clone());

        cb.invoke(&mut sb, vec![]).unwrap();
        assert!(cb.is_disposed());
        assert_eq!(sb.destroyed().len(), 1);
        assert!(cb.invoke(&mut sb, vec![]).is_err());
        assert_eq!(sb.destroyed().len(), 1);
    }

    #[test]
    fn test_reentrant_invoke_rejected() {
        let mut sb = Sandbox::new();
        let slot: Rc<RefCell<Option<Callback>>> = Rc::new(RefCell::new(None));
        let inner = Rc::clone(&slot);
        let nested = Rc::new(Cell::new(None));
        let nested_out = Rc::clone(&nested);
        let cb = sb.closure(0, move |sb, _| {
            let cb = inner.borrow().clone().unwrap();
            let err = cb.invoke(sb, vec![]).unwrap_err();
            nested_out.set(Some(matches!(err, GlueError::ClosureUnavailable)));
            Ok(())
        });
        *slot.borrow_mut() = Some(cb.clone());

        cb.invoke(&mut sb, vec![]).unwrap();
        assert_eq!(nested.get(), Some(true));
        assert!(cb.is_live());
        assert_eq!(cb.ref_count(), 1);
    }

    #[test]
    fn test_nested_calls_of_distinct_closures() {
        let mut sb = Sandbox::new();
        let (seen, body) = counter();
        let inner_cb = sb.closure(0, body);
        let to_call = inner_cb.clone();
        let outer = sb.closure(0, move |sb, _| {
            to_call.invoke(sb, vec![])?;
            assert!(to_call.release());
            Ok(())
        });

        outer.invoke(&mut sb, vec![]).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert!(inner_cb.is_disposed());
        assert!(outer.is_live());
        assert!(sb.destroyed().is_empty());
    }

    #[test]
    fn test_failing_body_still_settles() {
        let mut sb = Sandbox::new();
        let cb = sb.closure(0, |_, _| Err(GlueError::Guest("boom".into())));
        assert!(cb.invoke(&mut sb, vec![]).is_err());
        assert!(cb.is_live());
        assert_eq!(cb.ref_count(), 1);
    }

    #[test]
    fn test_arguments_padded_to_arity() {
        let mut sb = Sandbox::new();
        let (seen, body) = counter();
        let cb = sb.closure(1, body);
        cb.invoke(&mut sb, vec![]).unwrap();
        let handle = seen.borrow()[0][0];
        assert!(sb.glue_ref().heap.value(handle).is_undefined());

        cb.invoke(&mut sb, vec![HostValue::from(1.0), HostValue::from(2.0)])
            .unwrap();
        assert_eq!(seen.borrow()[1].len(), 1);
    }

    #[test]
    fn test_with_trampoline_shares_state() {
        let mut sb = Sandbox::new();
        let (_, body) = counter();
        let cb = sb.closure(1, body);
        let timer = cb.with_trampoline(Sandbox::trampoline(0));
        assert!(timer.ptr_eq(&cb));
        timer.invoke(&mut sb, vec![]).unwrap();
        assert_eq!(sb.trampoline_calls()[0].args.len(), 0);
        assert!(cb.release());
        assert!(timer.is_disposed());
    }
}
