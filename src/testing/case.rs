//! Test case definitions

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::common::{Error, Result};

/// Outcome reported by a test function that ran to completion
///
/// Errors returned from the function (including failed assertions) and panics
/// are classified by the engine, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    /// Failed with a message (empty means "Test returned false")
    Fail(String),
    /// The test decided it cannot run, e.g. missing fixture
    Skip(String),
}

impl Verdict {
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip(reason.into())
    }
}

impl From<bool> for Verdict {
    fn from(passed: bool) -> Self {
        if passed {
            Self::Pass
        } else {
            Self::Fail(String::new())
        }
    }
}

impl From<()> for Verdict {
    fn from(_: ()) -> Self {
        Self::Pass
    }
}

/// Boxed future produced by one invocation of a test function
pub type TestFuture = BoxFuture<'static, Result<Verdict>>;

/// Shareable zero-argument test function
pub type TestFn = Arc<dyn Fn() -> TestFuture + Send + Sync>;

/// A registered test
///
/// Immutable once built; the engine only reads it.
#[derive(Clone)]
pub struct TestCase {
    id: String,
    description: String,
    test_fn: TestFn,
    timeout: Option<Duration>,
    dependencies: Vec<String>,
}

impl TestCase {
    /// Build a test from an async function
    ///
    /// The function may return anything convertible into a `Verdict`:
    /// `()`, `bool`, or a `Verdict` itself.
    pub fn new<F, Fut, V>(id: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
        V: Into<Verdict>,
    {
        let test_fn: TestFn = Arc::new(move || -> TestFuture {
            let fut = f();
            Box::pin(async move {
                let verdict: Verdict = fut.await?.into();
                Ok(verdict)
            })
        });
        Self::from_fn(id, description, test_fn)
    }

    /// Build a test from a synchronous function
    ///
    /// The function runs on the blocking thread pool, so it may call blocking
    /// driver APIs. A timeout abandons the call but cannot interrupt it.
    pub fn blocking<F, V>(id: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<V> + Send + Sync + 'static,
        V: Into<Verdict> + Send + 'static,
    {
        let f = Arc::new(f);
        let test_fn: TestFn = Arc::new(move || -> TestFuture {
            let f = Arc::clone(&f);
            Box::pin(async move {
                match tokio::task::spawn_blocking(move || f()).await {
                    Ok(result) => {
                        let verdict: Verdict = result?.into();
                        Ok(verdict)
                    }
                    Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                    Err(e) => Err(Error::Internal(format!("blocking test was cancelled: {e}"))),
                }
            })
        });
        Self::from_fn(id, description, test_fn)
    }

    /// Build a test from an already boxed function
    pub fn from_fn(id: impl Into<String>, description: impl Into<String>, test_fn: TestFn) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            test_fn,
            timeout: None,
            dependencies: Vec::new(),
        }
    }

    /// Deadline for this test; the engine default applies otherwise
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tests expected to pass before this one
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Start one invocation of the test function
    pub(crate) fn invoke(&self) -> TestFuture {
        (self.test_fn)()
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
