//! Simulated modules, classes, and native breakpoints.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::error::DebugError;
use crate::surface::{
    BreakpointRef, ClassToken, ElementType, FieldInfo, FieldToken, MethodInfo, MethodToken,
    NativeBreakpoint, ParamSig, PropertyInfo, RawValue, RuntimeModule, ValueRef,
};
use crate::symbols::PdbInfo;

use super::value::SimValue;

static NEXT_CLASS_TOKEN: AtomicU32 = AtomicU32::new(0x0200_0010);
static NEXT_FIELD_TOKEN: AtomicU32 = AtomicU32::new(0x0400_0010);
static NEXT_METHOD_TOKEN: AtomicU32 = AtomicU32::new(0x0600_0010);
static NEXT_BREAKPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Canned behaviour of a simulated method body.
#[derive(Clone)]
pub enum SimBehavior {
    /// Compute a result from `(this, args)`. `Err` carries the exception
    /// type name the call throws.
    Returns(SimBodyFn),
    /// Always throw an exception of the named type.
    Throws(SmolStr),
    /// Never complete until aborted.
    Hangs,
}

pub type SimBodyFn =
    Arc<dyn Fn(Option<&ValueRef>, &[ValueRef]) -> Result<ValueRef, SmolStr> + Send + Sync>;

/// Simulated class metadata plus method bodies.
pub struct SimClass {
    pub(super) token: ClassToken,
    pub(super) name: SmolStr,
    pub(super) is_value_type: bool,
    pub(super) base: Option<Arc<SimClass>>,
    pub(super) fields: Vec<FieldInfo>,
    pub(super) properties: Vec<PropertyInfo>,
    pub(super) methods: Vec<(MethodInfo, SimBehavior)>,
    pub(super) statics: Mutex<FxHashMap<FieldToken, ValueRef>>,
    pub(super) module: Mutex<Weak<SimModule>>,
}

impl SimClass {
    /// A class known only by name, as throwing evals fabricate.
    #[must_use]
    pub fn adhoc(name: &str) -> Arc<Self> {
        ClassBuilder::new(name).build()
    }

    #[must_use]
    pub fn token(&self) -> ClassToken {
        self.token
    }

    #[must_use]
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    /// Token of the named instance field, searching the base chain.
    #[must_use]
    pub fn field_token(&self, name: &str) -> Option<FieldToken> {
        if let Some(field) = self.fields.iter().find(|field| field.name == name) {
            return Some(field.token);
        }
        self.base.as_ref()?.field_token(name)
    }

    /// Token of the named method, searching the base chain.
    #[must_use]
    pub fn method_token(&self, name: &str) -> Option<MethodToken> {
        if let Some((info, _)) = self.methods.iter().find(|(info, _)| info.name == name) {
            return Some(info.token);
        }
        self.base.as_ref()?.method_token(name)
    }

    /// Build an instance reference with fields given by name.
    #[must_use]
    pub fn instance(self: &Arc<Self>, fields: Vec<(&str, ValueRef)>) -> ValueRef {
        let resolved = self.resolve_field_tokens(fields);
        SimValue::object(self, resolved)
    }

    /// Build an inline value-type instance with fields given by name.
    #[must_use]
    pub fn struct_instance(self: &Arc<Self>, fields: Vec<(&str, ValueRef)>) -> ValueRef {
        let resolved = self.resolve_field_tokens(fields);
        SimValue::struct_value(self, resolved)
    }

    fn resolve_field_tokens(&self, fields: Vec<(&str, ValueRef)>) -> Vec<(FieldToken, ValueRef)> {
        fields
            .into_iter()
            .filter_map(|(name, value)| self.field_token(name).map(|token| (token, value)))
            .collect()
    }

    pub(super) fn behavior_of(&self, method: MethodToken) -> Option<(MethodInfo, SimBehavior)> {
        if let Some(found) = self
            .methods
            .iter()
            .find(|(info, _)| info.token == method)
            .cloned()
        {
            return Some(found);
        }
        self.base.as_ref()?.behavior_of(method)
    }
}

/// Builder for simulated classes.
pub struct ClassBuilder {
    token: ClassToken,
    name: SmolStr,
    is_value_type: bool,
    base: Option<Arc<SimClass>>,
    fields: Vec<FieldInfo>,
    properties: Vec<PropertyInfo>,
    methods: Vec<(MethodInfo, SimBehavior)>,
    statics: FxHashMap<FieldToken, ValueRef>,
}

impl ClassBuilder {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            token: NEXT_CLASS_TOKEN.fetch_add(1, Ordering::SeqCst),
            name: SmolStr::new(name),
            is_value_type: false,
            base: None,
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            statics: FxHashMap::default(),
        }
    }

    #[must_use]
    pub fn value_type(mut self) -> Self {
        self.is_value_type = true;
        self
    }

    #[must_use]
    pub fn base(mut self, base: &Arc<SimClass>) -> Self {
        self.base = Some(base.clone());
        self
    }

    #[must_use]
    pub fn field(mut self, name: &str, element: ElementType, type_name: &str) -> Self {
        self.fields.push(FieldInfo {
            token: NEXT_FIELD_TOKEN.fetch_add(1, Ordering::SeqCst),
            name: SmolStr::new(name),
            is_static: false,
            element,
            type_name: SmolStr::new(type_name),
        });
        self
    }

    #[must_use]
    pub fn static_field(
        mut self,
        name: &str,
        element: ElementType,
        type_name: &str,
        initial: ValueRef,
    ) -> Self {
        let token = NEXT_FIELD_TOKEN.fetch_add(1, Ordering::SeqCst);
        self.fields.push(FieldInfo {
            token,
            name: SmolStr::new(name),
            is_static: true,
            element,
            type_name: SmolStr::new(type_name),
        });
        self.statics.insert(token, initial);
        self
    }

    /// An auto-implemented property: surfaces the compiler's backing field
    /// alongside the property itself.
    #[must_use]
    pub fn auto_property(mut self, name: &str, element: ElementType, type_name: &str) -> Self {
        let backing = format!("<{name}>k__BackingField");
        self = self.field(&backing, element, type_name);
        let backing_token = self
            .fields
            .last()
            .map(|field| field.token)
            .unwrap_or_default();
        let getter = NEXT_METHOD_TOKEN.fetch_add(1, Ordering::SeqCst);
        self.methods.push((
            MethodInfo {
                token: getter,
                name: SmolStr::new(format!("get_{name}")),
                declaring_class: self.token,
                is_static: false,
                params: Vec::new(),
                return_element: element,
                return_type_name: SmolStr::new(type_name),
            },
            SimBehavior::Returns(Arc::new(move |this, _args| {
                let this = this.ok_or_else(|| SmolStr::new("System.NullReferenceException"))?;
                let target = if this.is_reference() {
                    this.dereference()
                        .map_err(|_| SmolStr::new("System.NullReferenceException"))?
                } else {
                    this.clone()
                };
                target
                    .field_value(0, backing_token)
                    .map_err(|_| SmolStr::new("System.MissingFieldException"))
            })),
        ));
        self.properties.push(PropertyInfo {
            name: SmolStr::new(name),
            getter: Some(getter),
            setter: None,
            is_static: false,
            element,
            type_name: SmolStr::new(type_name),
        });
        self
    }

    /// A property whose getter runs the given behaviour.
    #[must_use]
    pub fn property(
        mut self,
        name: &str,
        element: ElementType,
        type_name: &str,
        behavior: SimBehavior,
    ) -> Self {
        let getter = NEXT_METHOD_TOKEN.fetch_add(1, Ordering::SeqCst);
        self.methods.push((
            MethodInfo {
                token: getter,
                name: SmolStr::new(format!("get_{name}")),
                declaring_class: self.token,
                is_static: false,
                params: Vec::new(),
                return_element: element,
                return_type_name: SmolStr::new(type_name),
            },
            behavior,
        ));
        self.properties.push(PropertyInfo {
            name: SmolStr::new(name),
            getter: Some(getter),
            setter: None,
            is_static: false,
            element,
            type_name: SmolStr::new(type_name),
        });
        self
    }

    #[must_use]
    pub fn method(
        mut self,
        name: &str,
        is_static: bool,
        params: Vec<(&str, ElementType, &str)>,
        ret: (ElementType, &str),
        behavior: SimBehavior,
    ) -> Self {
        self.methods.push((
            MethodInfo {
                token: NEXT_METHOD_TOKEN.fetch_add(1, Ordering::SeqCst),
                name: SmolStr::new(name),
                declaring_class: self.token,
                is_static,
                params: params
                    .into_iter()
                    .map(|(name, element, type_name)| ParamSig {
                        name: SmolStr::new(name),
                        element,
                        type_name: SmolStr::new(type_name),
                    })
                    .collect(),
                return_element: ret.0,
                return_type_name: SmolStr::new(ret.1),
            },
            behavior,
        ));
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<SimClass> {
        Arc::new(SimClass {
            token: self.token,
            name: self.name,
            is_value_type: self.is_value_type,
            base: self.base,
            fields: self.fields,
            properties: self.properties,
            methods: self.methods,
            statics: Mutex::new(self.statics),
            module: Mutex::new(Weak::new()),
        })
    }
}

/// Simulated armed breakpoint.
pub struct SimBreakpoint {
    id: u64,
    method: MethodToken,
    il_offset: u32,
    active: AtomicBool,
}

impl SimBreakpoint {
    #[must_use]
    pub fn method(&self) -> MethodToken {
        self.method
    }

    #[must_use]
    pub fn il_offset(&self) -> u32 {
        self.il_offset
    }
}

impl NativeBreakpoint for SimBreakpoint {
    fn id(&self) -> u64 {
        self.id
    }

    fn activate(&self, active: bool) -> Result<(), DebugError> {
        self.active.store(active, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Simulated loaded module.
pub struct SimModule {
    name: SmolStr,
    classes: Mutex<Vec<Arc<SimClass>>>,
    symbols: Mutex<Option<Arc<PdbInfo>>>,
    breakpoints: Mutex<Vec<Arc<SimBreakpoint>>>,
}

impl SimModule {
    #[must_use]
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: SmolStr::new(name),
            classes: Mutex::new(Vec::new()),
            symbols: Mutex::new(None),
            breakpoints: Mutex::new(Vec::new()),
        })
    }

    pub fn add_class(self: &Arc<Self>, class: &Arc<SimClass>) {
        *class.module.lock().expect("sim class poisoned") = Arc::downgrade(self);
        self.classes
            .lock()
            .expect("sim module poisoned")
            .push(class.clone());
    }

    pub fn set_symbols(&self, symbols: PdbInfo) {
        *self.symbols.lock().expect("sim module poisoned") = Some(Arc::new(symbols));
    }

    /// All native breakpoints ever armed in this module.
    #[must_use]
    pub fn armed(&self) -> Vec<Arc<SimBreakpoint>> {
        self.breakpoints.lock().expect("sim module poisoned").clone()
    }

    fn class_by_token(&self, token: ClassToken) -> Option<Arc<SimClass>> {
        self.classes
            .lock()
            .expect("sim module poisoned")
            .iter()
            .find(|class| class.token == token)
            .cloned()
    }

    pub(super) fn behavior_of(&self, method: MethodToken) -> Option<(MethodInfo, SimBehavior)> {
        let classes = self.classes.lock().expect("sim module poisoned");
        classes.iter().find_map(|class| class.behavior_of(method))
    }
}

impl RuntimeModule for SimModule {
    fn name(&self) -> SmolStr {
        self.name.clone()
    }

    fn class_name(&self, class: ClassToken) -> Result<SmolStr, DebugError> {
        self.class_by_token(class)
            .map(|class| class.name.clone())
            .ok_or_else(|| DebugError::runtime("unknown class token"))
    }

    fn find_class(&self, name: &str) -> Option<ClassToken> {
        self.classes
            .lock()
            .expect("sim module poisoned")
            .iter()
            .find(|class| class.name == name)
            .map(|class| class.token)
    }

    fn base_class(&self, class: ClassToken) -> Result<Option<ClassToken>, DebugError> {
        let class = self
            .class_by_token(class)
            .ok_or_else(|| DebugError::runtime("unknown class token"))?;
        Ok(class.base.as_ref().map(|base| base.token))
    }

    fn fields_of(&self, class: ClassToken) -> Result<Vec<FieldInfo>, DebugError> {
        let class = self
            .class_by_token(class)
            .ok_or_else(|| DebugError::runtime("unknown class token"))?;
        Ok(class.fields.clone())
    }

    fn properties_of(&self, class: ClassToken) -> Result<Vec<PropertyInfo>, DebugError> {
        let class = self
            .class_by_token(class)
            .ok_or_else(|| DebugError::runtime("unknown class token"))?;
        Ok(class.properties.clone())
    }

    fn methods_named(&self, class: ClassToken, name: &str) -> Result<Vec<MethodInfo>, DebugError> {
        let class = self
            .class_by_token(class)
            .ok_or_else(|| DebugError::runtime("unknown class token"))?;
        Ok(class
            .methods
            .iter()
            .filter(|(info, _)| info.name == name)
            .map(|(info, _)| info.clone())
            .collect())
    }

    fn method_info(&self, method: MethodToken) -> Result<MethodInfo, DebugError> {
        self.behavior_of(method)
            .map(|(info, _)| info)
            .ok_or_else(|| DebugError::runtime("unknown method token"))
    }

    fn symbols(&self) -> Option<Arc<PdbInfo>> {
        self.symbols.lock().expect("sim module poisoned").clone()
    }

    fn arm_breakpoint(
        &self,
        method: MethodToken,
        il_offset: u32,
    ) -> Result<BreakpointRef, DebugError> {
        let breakpoint = Arc::new(SimBreakpoint {
            id: NEXT_BREAKPOINT_ID.fetch_add(1, Ordering::SeqCst),
            method,
            il_offset,
            active: AtomicBool::new(false),
        });
        self.breakpoints
            .lock()
            .expect("sim module poisoned")
            .push(breakpoint.clone());
        Ok(breakpoint)
    }
}

/// Read a static field of a simulated class.
pub(super) fn static_field(
    module: &SimModule,
    class: ClassToken,
    field: FieldToken,
) -> Result<ValueRef, DebugError> {
    let class = module
        .class_by_token(class)
        .ok_or_else(|| DebugError::runtime("unknown class token"))?;
    let statics = class.statics.lock().expect("sim class poisoned");
    statics
        .get(&field)
        .cloned()
        .ok_or_else(|| DebugError::runtime("static field has no value"))
}
