use std::fmt;
use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Body of a function selector.
pub type FunctionSource = Box<dyn Fn() -> Result<Value> + Send + Sync>;

/// Where a selector's value comes from.
///
/// The constructors convert typed sources into JSON values so they can be
/// written into a state container.
pub enum Source {
    /// Recomputed whenever a signal it reads changes.
    Function(FunctionSource),
    /// Settles once. `Err` carries the rejection reason.
    Future(BoxFuture<'static, std::result::Result<Value, String>>),
    /// Emits any number of values.
    Stream(BoxStream<'static, Value>),
}

impl Source {
    pub fn function<F, T>(f: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
        T: Serialize,
    {
        Self::Function(Box::new(move || Ok(serde_json::to_value(f()?)?)))
    }

    pub fn future<Fut, T, E>(future: Fut) -> Self
    where
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        T: Serialize,
        E: fmt::Display,
    {
        Self::Future(
            future
                .map(|outcome| match outcome {
                    Ok(value) => serde_json::to_value(value).map_err(|err| err.to_string()),
                    Err(err) => Err(err.to_string()),
                })
                .boxed(),
        )
    }

    /// Items that fail to serialize are logged and skipped.
    pub fn stream<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Serialize,
    {
        Self::Stream(
            stream
                .filter_map(|item| {
                    let value = match serde_json::to_value(item) {
                        Ok(value) => Some(value),
                        Err(err) => {
                            tracing::warn!(error = %err, "dropping stream item that failed to serialize");
                            None
                        }
                    };
                    futures_util::future::ready(value)
                })
                .boxed(),
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Function(_) => "function",
            Self::Future(_) => "future",
            Self::Stream(_) => "stream",
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Source").field(&self.kind()).finish()
    }
}
