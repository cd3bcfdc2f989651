//! Method marshalling
//!
//! Native methods are registered as plain Rust closures or method paths. At
//! registration time each one is turned into a [`MethodDescriptor`]: the ordered
//! parameter extractors, the number of incoming slots they consume, the method
//! kind and a compact signature string. No reflection happens at call time.
//!
//! ```text
//!   incoming args  [ 1.0 , "x" , 7 , 8 ]
//!                    │      │     └──┴── Promise (resolve id, reject id)
//!                    │      └────────── String
//!                    └───────────────── i32
//!   signature      "v.iSP"
//! ```
//!
//! # Example
//!
//! ```
//! use otter_bridge::method::MethodTable;
//! use otter_bridge::module::NativeModule;
//! use otter_bridge::promise::Promise;
//!
//! struct Clipboard;
//!
//! impl Clipboard {
//!     fn get_string(&self, promise: Promise) {
//!         promise.resolve("copied text");
//!     }
//! }
//!
//! impl NativeModule for Clipboard {
//!     fn methods(table: &mut MethodTable<Self>) {
//!         table
//!             .method("getString", Clipboard::get_string)
//!             .method("isAvailable", |_: &Clipboard| true);
//!     }
//! }
//! ```

use crate::callback::{Callback, CallbackInvoker};
use crate::error::{ArgumentError, BridgeError, BridgeResult, ModuleError, ValueError};
use crate::module::NativeModule;
use crate::promise::Promise;
use crate::token::RuntimeToken;
use crate::value::{
    Dynamic, ReadableArray, ReadableMap, Value, WritableArray, WritableMap, is_integral,
};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Weak;

/// Parameter types understood by the extractors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentType {
    Boolean,
    Int,
    Double,
    Float,
    String,
    Array,
    Map,
    Dynamic,
    Callback,
    Promise,
}

impl ArgumentType {
    /// Incoming array slots consumed by one parameter of this type
    pub const fn slots(self) -> usize {
        match self {
            ArgumentType::Promise => 2,
            _ => 1,
        }
    }

    pub const fn signature_char(self) -> char {
        match self {
            ArgumentType::Boolean => 'z',
            ArgumentType::Int => 'i',
            ArgumentType::Double => 'd',
            ArgumentType::Float => 'f',
            ArgumentType::String => 'S',
            ArgumentType::Array => 'A',
            ArgumentType::Map => 'M',
            ArgumentType::Dynamic => 'Y',
            ArgumentType::Callback => 'X',
            ArgumentType::Promise => 'P',
        }
    }
}

/// Primitives that may be null use the upper-case letter
const fn nullable_char(c: char) -> char {
    match c {
        'z' => 'Z',
        'i' => 'I',
        'd' => 'D',
        'f' => 'F',
        other => other,
    }
}

/// One declared parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub kind: ArgumentType,
    pub signature: char,
}

impl Parameter {
    pub fn of<T: FromArgument>() -> Self {
        Self {
            kind: T::TYPE,
            signature: T::SIGNATURE,
        }
    }
}

/// How script code calls a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Fire-and-forget; replies, if any, go through callbacks
    Async,
    /// Last parameter is a resolve/reject pair
    Promise,
    /// Returns a value synchronously on the script thread
    Sync,
}

impl MethodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MethodKind::Async => "async",
            MethodKind::Promise => "promise",
            MethodKind::Sync => "sync",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an extractor needs to build a parameter
pub struct CallContext<'a> {
    args: &'a ReadableArray,
    token: &'a RuntimeToken,
    invoker: &'a Weak<dyn CallbackInvoker>,
}

impl<'a> CallContext<'a> {
    pub fn new(
        args: &'a ReadableArray,
        token: &'a RuntimeToken,
        invoker: &'a Weak<dyn CallbackInvoker>,
    ) -> Self {
        Self {
            args,
            token,
            invoker,
        }
    }

    pub fn args(&self) -> &ReadableArray {
        self.args
    }

    pub fn token(&self) -> &RuntimeToken {
        self.token
    }

    fn callback(&self, index: usize) -> Result<Callback, ValueError> {
        let id = self.args.get_double(index)?;
        if !is_integral(id) || id < 0.0 {
            return Err(ValueError::Unsupported(format!("invalid callback id {id}")));
        }
        Ok(Callback::new(self.token.clone(), id as u64, self.invoker.clone()))
    }
}

/// A Rust type that can be extracted from incoming arguments
pub trait FromArgument: Sized + 'static {
    const TYPE: ArgumentType;
    const SIGNATURE: char = Self::TYPE.signature_char();

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError>;
}

impl FromArgument for bool {
    const TYPE: ArgumentType = ArgumentType::Boolean;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_bool(index)
    }
}

impl FromArgument for i32 {
    const TYPE: ArgumentType = ArgumentType::Int;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_int(index)
    }
}

impl FromArgument for f64 {
    const TYPE: ArgumentType = ArgumentType::Double;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_double(index)
    }
}

impl FromArgument for f32 {
    const TYPE: ArgumentType = ArgumentType::Float;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_double(index).map(|n| n as f32)
    }
}

impl FromArgument for String {
    const TYPE: ArgumentType = ArgumentType::String;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_string(index).map(str::to_string)
    }
}

impl FromArgument for ReadableArray {
    const TYPE: ArgumentType = ArgumentType::Array;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_array(index)
    }
}

impl FromArgument for ReadableMap {
    const TYPE: ArgumentType = ArgumentType::Map;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_map(index)
    }
}

impl FromArgument for Dynamic {
    const TYPE: ArgumentType = ArgumentType::Dynamic;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.args.get_dynamic(index)
    }
}

impl FromArgument for Callback {
    const TYPE: ArgumentType = ArgumentType::Callback;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        ctx.callback(index)
    }
}

impl FromArgument for Promise {
    const TYPE: ArgumentType = ArgumentType::Promise;

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        let resolve = ctx.callback(index)?;
        let reject = ctx.callback(index + 1)?;
        Ok(Promise::new(Some(resolve), Some(reject)))
    }
}

impl<T: FromArgument> FromArgument for Option<T> {
    const TYPE: ArgumentType = T::TYPE;
    const SIGNATURE: char = nullable_char(T::SIGNATURE);

    fn extract(ctx: &CallContext<'_>, index: usize) -> Result<Self, ValueError> {
        if ctx.args.is_null(index)? {
            Ok(None)
        } else {
            T::extract(ctx, index).map(Some)
        }
    }
}

/// A Rust type a native method may return
pub trait IntoReturn {
    const SIGNATURE: char;

    fn into_return(self) -> anyhow::Result<Option<Value>>;
}

impl IntoReturn for () {
    const SIGNATURE: char = 'v';

    fn into_return(self) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

macro_rules! impl_into_return {
    ($($ty:ty => $sig:literal),* $(,)?) => {
        $(
            impl IntoReturn for $ty {
                const SIGNATURE: char = $sig;

                fn into_return(self) -> anyhow::Result<Option<Value>> {
                    Ok(Some(Value::from(self)))
                }
            }
        )*
    };
}

impl_into_return! {
    bool => 'z',
    i32 => 'i',
    f64 => 'd',
    f32 => 'f',
    String => 'S',
    WritableMap => 'M',
    WritableArray => 'A',
    Value => 'Y',
}

impl<T, E> IntoReturn for Result<T, E>
where
    T: IntoReturn,
    E: Into<anyhow::Error>,
{
    const SIGNATURE: char = T::SIGNATURE;

    fn into_return(self) -> anyhow::Result<Option<Value>> {
        self.map_err(Into::into)?.into_return()
    }
}

/// A typed handler for module type `M` taking parameters `Args`
pub trait MethodHandler<M, Args>: Send + Sync + 'static {
    fn parameters() -> Vec<Parameter>;
    fn return_signature() -> char;
    fn call(&self, module: &M, ctx: &CallContext<'_>, method: &str)
    -> BridgeResult<Option<Value>>;
}

fn slot_range(start: usize, slots: usize) -> String {
    if slots == 1 {
        start.to_string()
    } else {
        format!("{}-{}", start, start + slots - 1)
    }
}

fn extract_argument<T: FromArgument>(
    ctx: &CallContext<'_>,
    next: &mut usize,
    method: &str,
) -> Result<T, ArgumentError> {
    let start = *next;
    let slots = T::TYPE.slots();
    *next += slots;
    T::extract(ctx, start).map_err(|source| ArgumentError::Type {
        method: method.to_string(),
        range: slot_range(start, slots),
        source,
    })
}

macro_rules! impl_method_handler {
    ($($arg:ident),*) => {
        impl<M, F, R, $($arg,)*> MethodHandler<M, ($($arg,)*)> for F
        where
            M: 'static,
            F: Fn(&M, $($arg),*) -> R + Send + Sync + 'static,
            R: IntoReturn,
            $($arg: FromArgument,)*
        {
            fn parameters() -> Vec<Parameter> {
                vec![$(Parameter::of::<$arg>()),*]
            }

            fn return_signature() -> char {
                R::SIGNATURE
            }

            #[allow(non_snake_case, unused_variables, unused_mut)]
            fn call(
                &self,
                module: &M,
                ctx: &CallContext<'_>,
                method: &str,
            ) -> BridgeResult<Option<Value>> {
                let mut next = 0usize;
                $(
                    let $arg = extract_argument::<$arg>(ctx, &mut next, method)?;
                )*
                (self)(module, $($arg),*)
                    .into_return()
                    .map_err(BridgeError::Native)
            }
        }
    };
}

impl_method_handler!();
impl_method_handler!(A1);
impl_method_handler!(A1, A2);
impl_method_handler!(A1, A2, A3);
impl_method_handler!(A1, A2, A3, A4);
impl_method_handler!(A1, A2, A3, A4, A5);
impl_method_handler!(A1, A2, A3, A4, A5, A6);
impl_method_handler!(A1, A2, A3, A4, A5, A6, A7);
impl_method_handler!(A1, A2, A3, A4, A5, A6, A7, A8);

type ErasedHandler =
    Box<dyn Fn(&dyn Any, &CallContext<'_>, &str) -> BridgeResult<Option<Value>> + Send + Sync>;

/// Cached description of one native method
pub struct MethodDescriptor {
    name: String,
    kind: MethodKind,
    signature: String,
    parameters: Vec<Parameter>,
    slots: usize,
    handler: ErasedHandler,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// `<returnChar>.<paramChar>*`
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Total incoming slots the parameters consume
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Check the call shape, extract arguments and run the handler.
    ///
    /// `instance` must be the module the descriptor was built for.
    pub fn invoke(
        &self,
        module_name: &str,
        instance: &dyn Any,
        ctx: &CallContext<'_>,
    ) -> BridgeResult<Option<Value>> {
        let method = format!("{}.{}", module_name, self.name);
        if ctx.args.len() != self.slots {
            return Err(ArgumentError::Count {
                method,
                expected: self.slots,
                actual: ctx.args.len(),
            }
            .into());
        }
        (self.handler)(instance, ctx, &method)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Dispatch table under construction for module type `M`
pub struct MethodTable<M> {
    module: String,
    methods: Vec<MethodDescriptor>,
    error: Option<ModuleError>,
    _module: PhantomData<fn(&M)>,
}

impl<M: 'static> MethodTable<M> {
    pub(crate) fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            methods: Vec::new(),
            error: None,
            _module: PhantomData,
        }
    }

    /// Register `handler` under `name`. Method ids follow registration order.
    pub fn method<Args, H>(&mut self, name: &str, handler: H) -> &mut Self
    where
        H: MethodHandler<M, Args>,
    {
        if self.error.is_some() {
            return self;
        }
        if self.methods.iter().any(|m| m.name == name) {
            self.error = Some(ModuleError::DuplicateMethod {
                module: self.module.clone(),
                method: name.to_string(),
            });
            return self;
        }
        match describe::<M, Args, H>(&self.module, name, handler) {
            Ok(descriptor) => self.methods.push(descriptor),
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub(crate) fn finish(self) -> Result<Vec<MethodDescriptor>, ModuleError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.methods),
        }
    }
}

fn describe<M, Args, H>(module: &str, name: &str, handler: H) -> Result<MethodDescriptor, ModuleError>
where
    M: 'static,
    H: MethodHandler<M, Args>,
{
    let invalid = |reason: &str| ModuleError::InvalidMethod {
        module: module.to_string(),
        method: name.to_string(),
        reason: reason.to_string(),
    };

    let parameters = H::parameters();
    let return_signature = H::return_signature();
    let kind = match parameters
        .iter()
        .position(|p| p.kind == ArgumentType::Promise)
    {
        Some(position) if position + 1 != parameters.len() => {
            return Err(invalid("Promise must be the last parameter"));
        }
        Some(_) if return_signature != 'v' => {
            return Err(invalid("Promise methods cannot return a value"));
        }
        Some(_) => MethodKind::Promise,
        None if return_signature != 'v' => MethodKind::Sync,
        None => MethodKind::Async,
    };

    let mut signature = String::with_capacity(parameters.len() + 2);
    signature.push(return_signature);
    signature.push('.');
    signature.extend(parameters.iter().map(|p| p.signature));

    let slots = parameters.iter().map(|p| p.kind.slots()).sum();
    let module_name = module.to_string();
    let handler: ErasedHandler = Box::new(
        move |instance: &dyn Any, ctx: &CallContext<'_>, method: &str| {
            let module = instance
                .downcast_ref::<M>()
                .ok_or_else(|| ModuleError::TypeMismatch(module_name.clone()))?;
            handler.call(module, ctx, method)
        },
    );

    Ok(MethodDescriptor {
        name: name.to_string(),
        kind,
        signature,
        parameters,
        slots,
        handler,
    })
}

/// Build the full dispatch table for `M`
pub(crate) fn describe_module<M: NativeModule>(
    module: &str,
) -> Result<Vec<MethodDescriptor>, ModuleError> {
    let mut table = MethodTable::<M>::new(module);
    M::methods(&mut table);
    table.finish()
}
