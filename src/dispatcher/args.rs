//! Type-erased argument packs handed to listeners on emit.

use std::any::{Any, type_name};
use std::fmt;

/// Ordered arguments for one emission.
///
/// The same pack is passed to every listener of the emission, so a
/// typed event mutated by one listener (e.g. stopping propagation) is
/// visible to the dispatcher afterwards.
///
/// ```ignore
/// let mut args = rocketdesk::args![StoreEvent::new(id, IndexType::Project)];
/// dispatcher.emit(&scope, STORE_INSERT_CHANNEL, &mut args)?;
/// ```
#[derive(Default)]
pub struct Args {
    values: Vec<Box<dyn Any + Send>>,
    names: Vec<&'static str>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument, builder style.
    pub fn with<T: Any + Send>(mut self, value: T) -> Self {
        self.push(value);
        self
    }

    /// Append an argument.
    pub fn push<T: Any + Send>(&mut self, value: T) {
        self.values.push(Box::new(value));
        self.names.push(type_name::<T>());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Borrow the argument at `index` if it has type `T`.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index).and_then(|v| v.downcast_ref::<T>())
    }

    /// Mutably borrow the argument at `index` if it has type `T`.
    pub fn get_mut<T: Any>(&mut self, index: usize) -> Option<&mut T> {
        self.values.get_mut(index).and_then(|v| v.downcast_mut::<T>())
    }

    /// Type name of the argument at `index`, as recorded on push.
    pub fn type_name_at(&self, index: usize) -> Option<&'static str> {
        self.names.get(index).copied()
    }

    pub(crate) fn check_arity(&self, expected: usize) -> Result<(), String> {
        if self.len() == expected {
            Ok(())
        } else {
            Err(format!(
                "listener takes {expected} parameter(s), emit supplied {}",
                self.len()
            ))
        }
    }

    pub(crate) fn typed<T: Any>(&self, index: usize) -> Result<&T, String> {
        match self.get::<T>(index) {
            Some(value) => Ok(value),
            None => Err(self.type_error::<T>(index)),
        }
    }

    pub(crate) fn typed_mut<T: Any>(&mut self, index: usize) -> Result<&mut T, String> {
        if self.get::<T>(index).is_none() {
            return Err(self.type_error::<T>(index));
        }
        self.get_mut::<T>(index)
            .ok_or_else(|| format!("parameter {index} vanished during dispatch"))
    }

    fn type_error<T: Any>(&self, index: usize) -> String {
        format!(
            "parameter {index} expected {}, found {}",
            type_name::<T>(),
            self.type_name_at(index).unwrap_or("nothing")
        )
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args").field("types", &self.names).finish()
    }
}

/// Build an [`Args`] pack from a list of values.
#[macro_export]
macro_rules! args {
    () => {
        $crate::dispatcher::Args::new()
    };
    ($($value:expr),+ $(,)?) => {{
        let mut args = $crate::dispatcher::Args::new();
        $(args.push($value);)+
        args
    }};
}
