//! Guest callbacks as host-callable values.
//!
//! A [`Closure`] pairs a trampoline in the guest's function table with the
//! guest environment it runs over. Its lifetime is reference counted
//! explicitly: it starts at one (the guest's own reference), host code
//! retains and releases it, and the guest destructor runs with
//! `(env, context)` exactly once when the count reaches zero and no call is
//! in flight.
//!
//! Dropping the last host copy of a closure that was never released queues
//! its destructor; [`run_finalizers`] drains the queue.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ferry_abi::Handle;
use log::{debug, error, warn};
use wasmi::{AsContextMut, Val};

use crate::error::{BridgeError, BridgeResult};
use crate::state::{self, with_state, BridgeState};
use crate::value::HostValue;

/// A destructor call owed by a closure that was dropped unreleased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingFinalizer {
    pub destructor: u32,
    pub env: i32,
    pub context: i32,
}

/// Destructors queued by dropped closures.
#[derive(Debug, Clone, Default)]
pub struct FinalizerQueue(Rc<RefCell<Vec<PendingFinalizer>>>);

impl FinalizerQueue {
    fn downgrade(&self) -> Weak<RefCell<Vec<PendingFinalizer>>> {
        Rc::downgrade(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<PendingFinalizer> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

struct ClosureState {
    trampoline: u32,
    env: i32,
    context: i32,
    destructor: u32,
    refs: Cell<u32>,
    in_flight: Cell<u32>,
    destroyed: Cell<bool>,
    finalizers: Weak<RefCell<Vec<PendingFinalizer>>>,
}

impl Drop for ClosureState {
    fn drop(&mut self) {
        if self.destroyed.get() {
            return;
        }
        let Some(queue) = self.finalizers.upgrade() else {
            return;
        };
        let pending = PendingFinalizer {
            destructor: self.destructor,
            env: self.env,
            context: self.context,
        };
        match queue.try_borrow_mut() {
            Ok(mut queue) => queue.push(pending),
            Err(_) => error!("finalizer queue busy; closure over env {:#x} leaked", self.env),
        };
    }
}

/// A guest callback the host can invoke.
///
/// Cloning shares the same closure; it does not retain it.
#[derive(Clone)]
pub struct Closure(Rc<ClosureState>);

impl Closure {
    /// Wrap guest callback state.
    ///
    /// `trampoline` and `destructor` are slots in the guest's function
    /// table: `trampoline(env, context, args...) [-> handle]` and
    /// `destructor(env, context)`.
    pub fn wrap(
        state: &BridgeState,
        env: i32,
        context: i32,
        destructor: u32,
        trampoline: u32,
    ) -> Self {
        Self(Rc::new(ClosureState {
            trampoline,
            env,
            context,
            destructor,
            refs: Cell::new(1),
            in_flight: Cell::new(0),
            destroyed: Cell::new(false),
            finalizers: state.finalizers.downgrade(),
        }))
    }

    pub fn env(&self) -> i32 {
        self.0.env
    }

    pub fn context(&self) -> i32 {
        self.0.context
    }

    pub fn ref_count(&self) -> u32 {
        self.0.refs.get()
    }

    pub fn in_flight(&self) -> u32 {
        self.0.in_flight.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.destroyed.get()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Take one more reference. A destroyed closure stays at zero.
    pub fn retain(&self) {
        if self.0.destroyed.get() {
            debug!("ignoring retain of destroyed closure over env {:#x}", self.0.env);
            return;
        }
        self.0.refs.set(self.0.refs.get() + 1);
    }

    /// Drop one reference. Returns whether the destructor ran as a result.
    ///
    /// Releasing from inside the closure's own call defers the destructor
    /// until that call returns. Releasing a closure with no references left
    /// does nothing.
    pub fn release<C>(&self, ctx: &mut C) -> bool
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let refs = self.0.refs.get();
        if refs == 0 {
            debug!("closure over env {:#x} released more often than retained", self.0.env);
            return false;
        }
        self.0.refs.set(refs - 1);
        if refs == 1 && self.0.in_flight.get() == 0 {
            self.destroy(ctx)
        } else {
            false
        }
    }

    /// Call the trampoline with `args`.
    ///
    /// Each argument is lent to the guest as a handle released when the call
    /// returns. A trampoline returning an i32 hands back an owned handle,
    /// which is taken from the table.
    pub fn invoke<C>(&self, ctx: &mut C, args: &[HostValue]) -> BridgeResult<HostValue>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let state = &self.0;
        if state.destroyed.get() || state.refs.get() == 0 {
            return Err(BridgeError::ClosureDestroyed);
        }

        state.in_flight.set(state.in_flight.get() + 1);
        let result = self.call_trampoline(ctx, args);
        state.in_flight.set(state.in_flight.get() - 1);

        if state.refs.get() == 0 && state.in_flight.get() == 0 {
            self.destroy(ctx);
        }
        result
    }

    fn call_trampoline<C>(&self, ctx: &mut C, args: &[HostValue]) -> BridgeResult<HostValue>
    where
        C: AsContextMut<Data = BridgeState>,
    {
        let handles: Vec<Handle> =
            with_state(ctx, |s| args.iter().map(|a| s.objects.alloc(a.clone())).collect());

        let mut params = Vec::with_capacity(handles.len() + 2);
        params.push(Val::I32(self.0.env));
        params.push(Val::I32(self.0.context));
        params.extend(handles.iter().map(|h| Val::I32(h.to_abi())));

        let result = state::call_table(ctx, self.0.trampoline, &params);

        with_state(ctx, |s| {
            for handle in &handles {
                if s.objects.release(*handle).is_err() {
                    debug!("argument {handle} was released by the guest during the call");
                }
            }
        });

        match result? {
            Some(Val::I32(raw)) => with_state(ctx, |s| s.objects.take(Handle::from_abi(raw))),
            Some(Val::F64(n)) => Ok(HostValue::Number(n.into())),
            _ => Ok(HostValue::Undefined),
        }
    }

    fn destroy<C>(&self, ctx: &mut C) -> bool
    where
        C: AsContextMut<Data = BridgeState>,
    {
        if self.0.destroyed.replace(true) {
            return false;
        }
        run_destructor(ctx, self.0.destructor, self.0.env, self.0.context);
        true
    }
}

fn run_destructor<C>(ctx: &mut C, destructor: u32, env: i32, context: i32)
where
    C: AsContextMut<Data = BridgeState>,
{
    let args = [Val::I32(env), Val::I32(context)];
    if let Err(err) = state::call_table(ctx, destructor, &args) {
        error!(
            "closure destructor {destructor} over env {env:#x} failed: {}",
            err.report()
        );
        with_state(ctx, |s| s.diagnostics.destructor_failures += 1);
    }
}

/// Run the destructors of closures dropped without being released.
///
/// Returns how many ran.
pub fn run_finalizers<C>(ctx: &mut C) -> usize
where
    C: AsContextMut<Data = BridgeState>,
{
    let pending = with_state(ctx, |s| s.finalizers.drain());
    for p in &pending {
        warn!(
            "closure over env {:#x} was dropped without being released; running destructor {}",
            p.env, p.destructor
        );
        run_destructor(ctx, p.destructor, p.env, p.context);
    }
    with_state(ctx, |s| s.diagnostics.leaked_closures += pending.len() as u64);
    pending.len()
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closure")
            .field("trampoline", &self.0.trampoline)
            .field("env", &self.0.env)
            .field("refs", &self.0.refs.get())
            .field("destroyed", &self.0.destroyed.get())
            .finish()
    }
}
