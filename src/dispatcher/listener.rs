//! Listener adaptation and signature descriptors.
//!
//! Every handler is adapted at subscribe time into a [`Listener`]: one
//! canonical `invoke(&mut Args)` entry point plus a declared
//! [`Signature`]. The dispatcher compares signatures explicitly instead
//! of inspecting handler types at emit time.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::args::Args;
use super::event::Event;

/// Descriptor of one listener parameter.
#[derive(Debug, Clone, Copy)]
pub struct ParamType {
    id: TypeId,
    name: &'static str,
}

impl ParamType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ParamType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ParamType {}

impl Hash for ParamType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Ordered parameter types of a listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Signature(Vec<ParamType>);

impl Signature {
    pub fn new(params: Vec<ParamType>) -> Self {
        Self(params)
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn params(&self) -> &[ParamType] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, param) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(param.name)?;
        }
        Ok(())
    }
}

/// What the dispatcher does after a listener returns successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Why a single invocation failed.
#[derive(Debug)]
pub(crate) enum InvokeError {
    Parameters(String),
    Handler(anyhow::Error),
}

type InvokeFn = dyn Fn(&mut Args) -> Result<Flow, InvokeError> + Send + Sync;

/// A handler adapted to the dispatcher's single calling convention.
pub struct Listener {
    signature: Signature,
    invoke: Box<InvokeFn>,
}

impl Listener {
    fn new<F>(signature: Signature, invoke: F) -> Self
    where
        F: Fn(&mut Args) -> Result<Flow, InvokeError> + Send + Sync + 'static,
    {
        Self {
            signature,
            invoke: Box::new(invoke),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub(crate) fn invoke(&self, args: &mut Args) -> Result<Flow, InvokeError> {
        (self.invoke)(args)
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("signature", &self.signature.to_string())
            .finish()
    }
}

/// Conversion of a closure into a [`Listener`].
///
/// Implemented for:
/// - `Fn(&mut E) -> anyhow::Result<()>` where `E: Event` (typed events,
///   may stop propagation)
/// - `Fn(&A, ..) -> anyhow::Result<()>` with zero to four parameters
///
/// The `Marker` parameter only disambiguates the blanket impls.
pub trait IntoListener<Marker>: Send + Sync + 'static {
    fn into_listener(self) -> Listener;
}

/// Marker for typed-event listeners.
pub struct EventMarker<E>(PhantomData<fn(E)>);

impl<F, E> IntoListener<EventMarker<E>> for F
where
    F: Fn(&mut E) -> anyhow::Result<()> + Send + Sync + 'static,
    E: Event,
{
    fn into_listener(self) -> Listener {
        Listener::new(
            Signature::new(vec![ParamType::of::<E>()]),
            move |args: &mut Args| {
                args.check_arity(1).map_err(InvokeError::Parameters)?;
                let event = args.typed_mut::<E>(0).map_err(InvokeError::Parameters)?;
                (self)(&mut *event).map_err(InvokeError::Handler)?;
                if event.is_propagation_stopped() {
                    Ok(Flow::Stop)
                } else {
                    Ok(Flow::Continue)
                }
            },
        )
    }
}

macro_rules! impl_into_listener {
    ($arity:expr; $($param:ident => $index:tt),*) => {
        impl<F, $($param,)*> IntoListener<fn($(&$param,)*)> for F
        where
            F: Fn($(&$param),*) -> anyhow::Result<()> + Send + Sync + 'static,
            $($param: Any + Send,)*
        {
            #[allow(non_snake_case)]
            fn into_listener(self) -> Listener {
                Listener::new(
                    Signature::new(vec![$(ParamType::of::<$param>()),*]),
                    move |args: &mut Args| {
                        args.check_arity($arity).map_err(InvokeError::Parameters)?;
                        $(let $param = args.typed::<$param>($index).map_err(InvokeError::Parameters)?;)*
                        (self)($($param),*).map_err(InvokeError::Handler)?;
                        Ok(Flow::Continue)
                    },
                )
            }
        }
    };
}

impl_into_listener!(0;);
impl_into_listener!(1; A => 0);
impl_into_listener!(2; A => 0, B => 1);
impl_into_listener!(3; A => 0, B => 1, C => 2);
impl_into_listener!(4; A => 0, B => 1, C => 2, D => 3);
