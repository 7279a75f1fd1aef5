//! In-process automation runtime
//!
//! Classes are registered as factories producing `DispatchTable`s, whose
//! members are plain Rust closures. Threading initialization follows the
//! platform rules: reference-counted per thread, and a thread cannot switch
//! concurrency model while initialized.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::runtime::{ApartmentModel, AutomationRuntime, ClassId};
use super::{
    Dispatch, DispParams, ExceptionInfo, InvokeError, Locale, MemberId, MemberKind,
};
use crate::errors::Hresult;
use crate::interop::TypedValue;
use crate::logging::{debug, trace};

type MethodFn = dyn Fn(&[TypedValue]) -> Result<TypedValue, Fault> + Send + Sync;
type GetterFn = dyn Fn() -> Result<TypedValue, Fault> + Send + Sync;
type SetterFn = dyn Fn(TypedValue) -> Result<(), Fault> + Send + Sync;
type Factory = Arc<dyn Fn() -> DispatchTable + Send + Sync>;

/// Failure raised by a member closure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Rich exception (source, description, code)
    Exception(ExceptionInfo),
    /// Argument at `position` (0-based, declaration order) was unusable
    BadArgument { status: Hresult, position: usize },
    /// Plain failure status
    Status(Hresult),
}

impl Fault {
    pub fn exception(code: u16, source: &str, description: &str) -> Self {
        Self::Exception(ExceptionInfo {
            wcode: code,
            scode: 0,
            source: Some(source.to_owned()),
            description: Some(description.to_owned()),
        })
    }

    pub fn type_mismatch(position: usize) -> Self {
        Self::BadArgument {
            status: Hresult::DISP_E_TYPEMISMATCH,
            position,
        }
    }

    fn into_invoke_error(self, total: usize) -> InvokeError {
        match self {
            Self::Exception(info) => InvokeError::exception(info),
            Self::BadArgument { status, position } => {
                // Objects report the index into the reversed argument array
                let arg_err = total.saturating_sub(position + 1);
                InvokeError::bad_argument(status, arg_err as u32)
            }
            Self::Status(status) => InvokeError::status(status),
        }
    }
}

enum Member {
    Method(Arc<MethodFn>),
    Property {
        get: Option<Arc<GetterFn>>,
        set: Option<Arc<SetterFn>>,
    },
}

/// Late-bound object built from closures
///
/// Names resolve case-insensitively. Method closures receive their arguments
/// in declaration order.
#[derive(Default)]
pub struct DispatchTable {
    ids: HashMap<String, MemberId>,
    members: Vec<(String, Member)>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method
    pub fn method<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&[TypedValue]) -> Result<TypedValue, Fault> + Send + Sync + 'static,
    {
        self.insert(name, Member::Method(Arc::new(body)))
    }

    /// Add a read-write property backed by a stored value
    pub fn property(self, name: &str, initial: TypedValue) -> Self {
        let cell = Arc::new(Mutex::new(initial));
        let read = Arc::clone(&cell);
        self.accessor(
            name,
            move || Ok(read.lock().clone()),
            move |value| {
                *cell.lock() = value;
                Ok(())
            },
        )
    }

    /// Add a read-only property
    pub fn readonly<G>(self, name: &str, get: G) -> Self
    where
        G: Fn() -> Result<TypedValue, Fault> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Property {
                get: Some(Arc::new(get)),
                set: None,
            },
        )
    }

    /// Add a property with explicit accessors
    pub fn accessor<G, S>(self, name: &str, get: G, set: S) -> Self
    where
        G: Fn() -> Result<TypedValue, Fault> + Send + Sync + 'static,
        S: Fn(TypedValue) -> Result<(), Fault> + Send + Sync + 'static,
    {
        self.insert(
            name,
            Member::Property {
                get: Some(Arc::new(get)),
                set: Some(Arc::new(set)),
            },
        )
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn insert(mut self, name: &str, member: Member) -> Self {
        let key = name.to_lowercase();
        match self.ids.get(&key) {
            Some(id) => {
                let slot = (id.0 - 1) as usize;
                self.members[slot] = (name.to_owned(), member);
            }
            None => {
                self.members.push((name.to_owned(), member));
                self.ids.insert(key, MemberId(self.members.len() as i32));
            }
        }
        self
    }

    fn member(&self, id: MemberId) -> Option<&(String, Member)> {
        usize::try_from(id.0 - 1).ok().and_then(|i| self.members.get(i))
    }
}

impl Dispatch for DispatchTable {
    fn id_of_name(&self, name: &str, _locale: Locale) -> Result<MemberId, Hresult> {
        self.ids
            .get(&name.to_lowercase())
            .copied()
            .ok_or(Hresult::DISP_E_UNKNOWNNAME)
    }

    fn invoke(
        &self,
        id: MemberId,
        _locale: Locale,
        kind: MemberKind,
        params: &DispParams,
    ) -> Result<TypedValue, InvokeError> {
        let (name, member) = self
            .member(id)
            .ok_or_else(|| InvokeError::status(Hresult::DISP_E_MEMBERNOTFOUND))?;
        let total = params.args.len();
        trace!(target: "registry", member = %name, ?kind, total, "table invoke");

        match (kind, member) {
            (MemberKind::Method, Member::Method(body)) => {
                let declared: Vec<TypedValue> = params.declared().cloned().collect();
                body(&declared).map_err(|fault| fault.into_invoke_error(total))
            }
            (MemberKind::PropertyGet, Member::Property { get: Some(get), .. }) => {
                if total != 0 {
                    return Err(InvokeError::status(Hresult::DISP_E_BADPARAMCOUNT));
                }
                get().map_err(|fault| fault.into_invoke_error(total))
            }
            (MemberKind::PropertySet, Member::Property { set: Some(set), .. }) => {
                if !params.is_property_put() {
                    return Err(InvokeError::bad_argument(Hresult::DISP_E_PARAMNOTFOUND, 0));
                }
                if total != 1 {
                    return Err(InvokeError::status(Hresult::DISP_E_BADPARAMCOUNT));
                }
                set(params.args[0].clone())
                    .map(|()| TypedValue::Empty)
                    .map_err(|fault| fault.into_invoke_error(total))
            }
            _ => Err(InvokeError::status(Hresult::DISP_E_MEMBERNOTFOUND)),
        }
    }
}

/// Something the runtime did, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEvent {
    Initialize(ApartmentModel),
    Uninitialize,
    OleInitialize,
    OleUninitialize,
    Activate(ClassId),
    Release(ClassId),
}

#[derive(Debug, Clone, Copy, Default)]
struct ThreadState {
    model: Option<ApartmentModel>,
    count: usize,
}

thread_local! {
    static THREAD_STATE: Cell<ThreadState> = Cell::new(ThreadState::default());
}

/// Registry-backed runtime living inside the process
#[derive(Default)]
pub struct InProcessRuntime {
    classes: DashMap<ClassId, Factory>,
    prog_ids: DashMap<String, ClassId>,
    live: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<RuntimeEvent>>>,
    init_failure: Mutex<Option<Hresult>>,
}

impl InProcessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class under a progid (case-insensitive) and class id
    pub fn register<F>(&self, prog_id: &str, class: ClassId, factory: F)
    where
        F: Fn() -> DispatchTable + Send + Sync + 'static,
    {
        self.prog_ids.insert(prog_id.to_lowercase(), class);
        self.register_class(class, factory);
        debug!(target: "registry", prog_id, %class, "class registered");
    }

    /// Register a class reachable only by its class id
    pub fn register_class<F>(&self, class: ClassId, factory: F)
    where
        F: Fn() -> DispatchTable + Send + Sync + 'static,
    {
        self.classes.insert(class, Arc::new(factory));
    }

    /// Make every later initialization fail with `status`
    pub fn fail_initialization_with(&self, status: Option<Hresult>) {
        *self.init_failure.lock() = status;
    }

    /// Objects created and not yet released
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<RuntimeEvent> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: RuntimeEvent) {
        self.events.lock().push(event);
    }

    fn enter(&self, model: ApartmentModel) -> Hresult {
        if let Some(status) = *self.init_failure.lock() {
            return status;
        }
        THREAD_STATE.with(|cell| {
            let state = cell.get();
            match state.model {
                None => {
                    cell.set(ThreadState { model: Some(model), count: 1 });
                    Hresult::S_OK
                }
                Some(current) if current == model => {
                    cell.set(ThreadState { count: state.count + 1, ..state });
                    Hresult::S_FALSE
                }
                Some(_) => Hresult::RPC_E_CHANGED_MODE,
            }
        })
    }

    fn leave(&self) {
        THREAD_STATE.with(|cell| {
            let state = cell.get();
            let count = state.count.saturating_sub(1);
            let model = if count == 0 { None } else { state.model };
            cell.set(ThreadState { model, count });
        });
    }

    fn thread_initialized() -> bool {
        THREAD_STATE.with(|cell| cell.get().model.is_some())
    }
}

impl AutomationRuntime for InProcessRuntime {
    fn initialize(&self, model: ApartmentModel) -> Hresult {
        let status = self.enter(model);
        if status.is_success() {
            self.record(RuntimeEvent::Initialize(model));
        }
        status
    }

    fn uninitialize(&self) {
        self.leave();
        self.record(RuntimeEvent::Uninitialize);
    }

    fn ole_initialize(&self) -> Hresult {
        // OLE requires a single-threaded apartment
        let status = self.enter(ApartmentModel::ApartmentThreaded);
        if status.is_success() {
            self.record(RuntimeEvent::OleInitialize);
        }
        status
    }

    fn ole_uninitialize(&self) {
        self.leave();
        self.record(RuntimeEvent::OleUninitialize);
    }

    fn class_id_from_prog_id(&self, prog_id: &str) -> Result<ClassId, Hresult> {
        self.prog_ids
            .get(&prog_id.to_lowercase())
            .map(|entry| *entry.value())
            .ok_or(Hresult::CO_E_CLASSSTRING)
    }

    fn create_instance(&self, class: &ClassId) -> Result<Box<dyn Dispatch>, Hresult> {
        if !Self::thread_initialized() {
            return Err(Hresult::CO_E_NOTINITIALIZED);
        }
        let factory = self
            .classes
            .get(class)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Hresult::REGDB_E_CLASSNOTREG)?;

        let table = factory();
        self.live.fetch_add(1, Ordering::AcqRel);
        self.record(RuntimeEvent::Activate(*class));

        Ok(Box::new(Instance {
            class: *class,
            table,
            live: Arc::clone(&self.live),
            events: Arc::clone(&self.events),
        }))
    }
}

/// Activated object; released on drop
struct Instance {
    class: ClassId,
    table: DispatchTable,
    live: Arc<AtomicUsize>,
    events: Arc<Mutex<Vec<RuntimeEvent>>>,
}

impl Dispatch for Instance {
    fn id_of_name(&self, name: &str, locale: Locale) -> Result<MemberId, Hresult> {
        self.table.id_of_name(name, locale)
    }

    fn invoke(
        &self,
        member: MemberId,
        locale: Locale,
        kind: MemberKind,
        params: &DispParams,
    ) -> Result<TypedValue, InvokeError> {
        self.table.invoke(member, locale, kind, params)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.events.lock().push(RuntimeEvent::Release(self.class));
    }
}
