// Copyright (c) The trial-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test case descriptors.
//!
//! A [`TestCase`] is handed over by discovery and is opaque to the invoker beyond what is
//! described here: a declaring [`TestClass`], a bound [`TestMethod`], and the
//! [`TestArguments`] to pass to it.
//!
//! Test class instances may optionally be disposable. Since the invoker only sees erased
//! instances, types advertise this through [`TestFixture`]: a type that can be disposed
//! synchronously returns itself from [`TestFixture::as_dispose`], and one that can be disposed
//! asynchronously returns itself from [`TestFixture::as_async_dispose`].

use crate::failure::TestFailure;
use debug_ignore::DebugIgnore;
use futures::{FutureExt, future::BoxFuture};
use smol_str::SmolStr;
use std::{
    any::{Any, type_name},
    fmt,
    future::Future,
    sync::Arc,
};

/// The future returned by a test method.
pub type TestFuture = BoxFuture<'static, Result<(), TestFailure>>;

type ConstructorFn =
    dyn Fn() -> BoxFuture<'static, Result<TestInstance, TestFailure>> + Send + Sync;
type StaticMethodFn = dyn Fn(TestArguments) -> TestFuture + Send + Sync;
type InstanceMethodFn = dyn Fn(TestInstance, TestArguments) -> TestFuture + Send + Sync;

/// A type that can be instantiated as a test class.
pub trait TestFixture: Any + Send + Sync {
    /// Returns the synchronous disposal capability of this instance, if any.
    fn as_dispose(&self) -> Option<&dyn Dispose> {
        None
    }

    /// Returns the asynchronous disposal capability of this instance, if any.
    fn as_async_dispose(&self) -> Option<&dyn AsyncDispose> {
        None
    }
}

/// Synchronous disposal of a test class instance.
pub trait Dispose: Send + Sync {
    /// Releases resources held by the instance.
    fn dispose(&self) -> Result<(), TestFailure>;
}

/// Asynchronous disposal of a test class instance.
pub trait AsyncDispose: Send + Sync {
    /// Releases resources held by the instance.
    fn dispose_async(&self) -> BoxFuture<'_, Result<(), TestFailure>>;
}

/// A constructed, type-erased test class instance.
#[derive(Clone)]
pub struct TestInstance {
    value: Arc<dyn Any + Send + Sync>,
    fixture: Arc<dyn TestFixture>,
    type_name: &'static str,
}

impl TestInstance {
    /// Wraps a constructed value.
    pub fn new<T: TestFixture>(value: T) -> Self {
        let value = Arc::new(value);
        Self {
            value: value.clone(),
            fixture: value,
            type_name: type_name::<T>(),
        }
    }

    /// Returns the instance as a `T`, if it is one.
    pub fn downcast<T: TestFixture>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    /// Returns the name of the instance's type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the instance's disposal capabilities.
    pub fn fixture(&self) -> &dyn TestFixture {
        &*self.fixture
    }
}

impl fmt::Debug for TestInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestInstance")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The class that declares a test method.
#[derive(Clone, Debug)]
pub struct TestClass {
    name: SmolStr,
    constructor: Option<DebugIgnore<Arc<ConstructorFn>>>,
}

impl TestClass {
    /// Creates a class that cannot be instantiated. Only static methods may be run on it.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            constructor: None,
        }
    }

    /// Creates a class whose instances are built by `constructor`.
    pub fn with_constructor<T, F, Fut>(name: impl Into<SmolStr>, constructor: F) -> Self
    where
        T: TestFixture,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TestFailure>> + Send + 'static,
    {
        let constructor: Arc<ConstructorFn> =
            Arc::new(move || constructor().map(|res| res.map(TestInstance::new)).boxed());
        Self {
            name: name.into(),
            constructor: Some(DebugIgnore(constructor)),
        }
    }

    /// Creates a class whose instances are built with [`Default`].
    pub fn with_default<T>(name: impl Into<SmolStr>) -> Self
    where
        T: TestFixture + Default,
    {
        Self::with_constructor(name, || async { Ok(T::default()) })
    }

    /// Returns the name of the class.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the class can be instantiated.
    pub fn has_constructor(&self) -> bool {
        self.constructor.is_some()
    }

    pub(crate) fn construct(&self) -> Option<BoxFuture<'static, Result<TestInstance, TestFailure>>> {
        self.constructor.as_ref().map(|constructor| (constructor.0)())
    }
}

#[derive(Clone)]
enum MethodBody {
    Static(Arc<StaticMethodFn>),
    Instance(Arc<InstanceMethodFn>),
}

/// A test method bound to its implementation.
#[derive(Clone, Debug)]
pub struct TestMethod {
    name: SmolStr,
    parameter_count: usize,
    body: DebugIgnore<MethodBody>,
}

impl TestMethod {
    /// Creates a method that doesn't need a class instance.
    pub fn new_static<F, Fut>(name: impl Into<SmolStr>, parameter_count: usize, body: F) -> Self
    where
        F: Fn(TestArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestFailure>> + Send + 'static,
    {
        let body: Arc<StaticMethodFn> = Arc::new(move |args| body(args).boxed());
        Self {
            name: name.into(),
            parameter_count,
            body: DebugIgnore(MethodBody::Static(body)),
        }
    }

    /// Creates a method that runs on an instance of `T`.
    pub fn new_instance<T, F, Fut>(
        name: impl Into<SmolStr>,
        parameter_count: usize,
        body: F,
    ) -> Self
    where
        T: TestFixture,
        F: Fn(Arc<T>, TestArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TestFailure>> + Send + 'static,
    {
        let body: Arc<InstanceMethodFn> = Arc::new(move |instance: TestInstance, args| {
            match instance.downcast::<T>() {
                Some(this) => body(this, args).boxed(),
                None => {
                    let failure = TestFailure::exception(
                        "InstanceTypeMismatch",
                        format!(
                            "test method expected an instance of `{}`, but the test class \
                             constructed `{}`",
                            type_name::<T>(),
                            instance.type_name(),
                        ),
                    );
                    futures::future::ready(Err(failure)).boxed()
                }
            }
        });
        Self {
            name: name.into(),
            parameter_count,
            body: DebugIgnore(MethodBody::Instance(body)),
        }
    }

    /// Returns the name of the method.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of parameters the method declares.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Returns true if the method can run without a class instance.
    pub fn is_static(&self) -> bool {
        matches!(self.body.0, MethodBody::Static(_))
    }

    /// Starts the method. Returns a failure if an instance method is called without an instance.
    pub(crate) fn invoke(&self, instance: Option<&TestInstance>, args: TestArguments) -> TestFuture {
        match (&self.body.0, instance) {
            (MethodBody::Static(body), _) => body(args),
            (MethodBody::Instance(body), Some(instance)) => body(instance.clone(), args),
            (MethodBody::Instance(_), None) => {
                let failure = TestFailure::exception(
                    "MissingInstance",
                    format!("instance method `{}` called without an instance", self.name),
                );
                futures::future::ready(Err(failure)).boxed()
            }
        }
    }
}

/// A single argument value passed to a test method.
#[derive(Clone)]
pub struct TestArgument {
    value: Arc<dyn Any + Send + Sync>,
    display: String,
}

impl TestArgument {
    /// Creates a new argument.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        let display = format!("{value:?}");
        Self {
            value: Arc::new(value),
            display,
        }
    }

    /// Returns the value as a `T`, if it is one.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl fmt::Debug for TestArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

/// The arguments supplied to a test method.
#[derive(Clone, Debug, Default)]
pub struct TestArguments {
    values: Vec<TestArgument>,
}

impl TestArguments {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an argument.
    pub fn with<T>(mut self, value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        self.values.push(TestArgument::new(value));
        self
    }

    /// Returns the number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the argument at `index` as a `T`.
    pub fn get<T: Any>(&self, index: usize) -> Result<&T, TestFailure> {
        let argument = self.values.get(index).ok_or_else(|| {
            TestFailure::exception(
                "ArgumentIndexOutOfRange",
                format!(
                    "argument index {index} is out of range ({} arguments provided)",
                    self.values.len()
                ),
            )
        })?;
        argument.downcast_ref::<T>().ok_or_else(|| {
            TestFailure::exception(
                "ArgumentTypeMismatch",
                format!(
                    "argument {index} ({argument:?}) is not of type `{}`",
                    type_name::<T>()
                ),
            )
        })
    }

    /// Iterates over the arguments.
    pub fn iter(&self) -> impl Iterator<Item = &TestArgument> {
        self.values.iter()
    }
}

impl FromIterator<TestArgument> for TestArguments {
    fn from_iter<I: IntoIterator<Item = TestArgument>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Identifying information for a test case, carried on lifecycle messages.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestCaseInfo {
    /// A unique identifier for the test case.
    pub id: SmolStr,

    /// The name shown to users.
    pub display_name: SmolStr,

    /// The name of the declaring class.
    pub class_name: SmolStr,

    /// The name of the test method.
    pub method_name: SmolStr,
}

/// A test case to run.
#[derive(Clone, Debug)]
pub struct TestCase {
    id: SmolStr,
    display_name: SmolStr,
    class: TestClass,
    method: TestMethod,
    arguments: TestArguments,
}

impl TestCase {
    /// Creates a new test case with no arguments.
    ///
    /// The ID and display name default to `class::method`.
    pub fn new(class: TestClass, method: TestMethod) -> Self {
        let id = SmolStr::from(format!("{}::{}", class.name(), method.name()));
        Self {
            display_name: id.clone(),
            id,
            class,
            method,
            arguments: TestArguments::new(),
        }
    }

    /// Sets the unique identifier.
    pub fn with_id(mut self, id: impl Into<SmolStr>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, display_name: impl Into<SmolStr>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Sets the arguments passed to the test method.
    pub fn with_arguments(mut self, arguments: TestArguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Returns the unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the declaring class.
    pub fn class(&self) -> &TestClass {
        &self.class
    }

    /// Returns the test method.
    pub fn method(&self) -> &TestMethod {
        &self.method
    }

    /// Returns the arguments passed to the test method.
    pub fn arguments(&self) -> &TestArguments {
        &self.arguments
    }

    /// Returns identifying information for messages.
    pub fn info(&self) -> TestCaseInfo {
        TestCaseInfo {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            class_name: self.class.name.clone(),
            method_name: self.method.name.clone(),
        }
    }
}
