//! Registration - handler registration and registry construction
//!
//! - An explicit registration table; nothing is discovered at runtime.
//! - Validation happens at startup and fails fast.
//! - One failed entry means no registry at all.
//!
//! Handlers and descriptors are supplied as factories so that construction
//! happens inside [`populate`], where a failure can abort startup before
//! anything is shared.

use std::fmt::Display;
use std::sync::Arc;

use tracing::debug;

use crate::domain::Opcode;
use crate::typed::{
    Handler, HandlerRegistry, JsonDescriptor, PayloadDescriptor, RegistryError, Request,
    RequestHandler, TypedHandler,
};

pub type HandlerFactory = Box<dyn FnOnce() -> Result<Arc<dyn Handler>, String> + Send>;
pub type DescriptorFactory = Box<dyn FnOnce() -> Arc<dyn PayloadDescriptor> + Send>;

/// One `(opcode, handler factory, descriptor factory)` entry.
pub struct Registration {
    opcode: Opcode,
    handler: HandlerFactory,
    descriptor: DescriptorFactory,
}

impl Registration {
    pub fn new<H, D>(
        opcode: impl Into<Opcode>,
        handler: impl FnOnce() -> H + Send + 'static,
        descriptor: impl FnOnce() -> D + Send + 'static,
    ) -> Self
    where
        H: Handler,
        D: PayloadDescriptor,
    {
        Self::fallible(opcode, move || Ok::<_, String>(handler()), descriptor)
    }

    /// Like [`Registration::new`], but the handler factory may fail. The
    /// error aborts population as [`RegistryError::FactoryFailed`].
    pub fn fallible<H, D, E>(
        opcode: impl Into<Opcode>,
        handler: impl FnOnce() -> Result<H, E> + Send + 'static,
        descriptor: impl FnOnce() -> D + Send + 'static,
    ) -> Self
    where
        H: Handler,
        D: PayloadDescriptor,
        E: Display,
    {
        Self {
            opcode: opcode.into(),
            handler: Box::new(move || {
                handler()
                    .map(|h| Arc::new(h) as Arc<dyn Handler>)
                    .map_err(|e| e.to_string())
            }),
            descriptor: Box::new(move || Arc::new(descriptor()) as Arc<dyn PayloadDescriptor>),
        }
    }

    /// Typed route: opcode and descriptor come from `R`.
    pub fn route<R, H>(handler: impl FnOnce() -> H + Send + 'static) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        Self::new(
            R::OPCODE,
            move || TypedHandler::<R, H>::new(handler()),
            JsonDescriptor::<R>::new,
        )
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    fn instantiate(self) -> Result<(Arc<dyn Handler>, Arc<dyn PayloadDescriptor>), RegistryError> {
        let handler = (self.handler)().map_err(|reason| RegistryError::FactoryFailed {
            opcode: self.opcode,
            reason,
        })?;
        Ok((handler, (self.descriptor)()))
    }
}

/// Anything that can feed [`populate`].
pub trait RegistrationSource {
    /// Opcodes that must be bound once population finishes.
    fn expected_opcodes(&self) -> Vec<Opcode> {
        Vec::new()
    }

    fn into_registrations(self) -> Vec<Registration>;
}

impl RegistrationSource for Vec<Registration> {
    fn into_registrations(self) -> Vec<Registration> {
        self
    }
}

/// Collects registration entries.
///
/// # Example
/// ```ignore
/// let table = RegistrationTable::new()
///     .handler(1u16, || EchoHandler, || RawDescriptor::new("echo"))
///     .route::<Login, _>(|| LoginHandler::new(store))
///     .expect_opcodes(&[Opcode::new(1), Login::OPCODE]);
/// let courier = Courier::start(table, &config, events)?;
/// ```
#[derive(Default)]
pub struct RegistrationTable {
    entries: Vec<Registration>,
    expected: Vec<Opcode>,
}

impl RegistrationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler<H, D>(
        self,
        opcode: impl Into<Opcode>,
        handler: impl FnOnce() -> H + Send + 'static,
        descriptor: impl FnOnce() -> D + Send + 'static,
    ) -> Self
    where
        H: Handler,
        D: PayloadDescriptor,
    {
        self.add(Registration::new(opcode, handler, descriptor))
    }

    pub fn route<R, H>(self, handler: impl FnOnce() -> H + Send + 'static) -> Self
    where
        R: Request,
        H: RequestHandler<R>,
    {
        self.add(Registration::route::<R, H>(handler))
    }

    pub fn add(mut self, registration: Registration) -> Self {
        self.entries.push(registration);
        self
    }

    /// Population fails unless every opcode listed here ends up bound.
    pub fn expect_opcodes(mut self, opcodes: &[Opcode]) -> Self {
        self.expected.extend_from_slice(opcodes);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        populate(self)
    }
}

impl RegistrationSource for RegistrationTable {
    fn expected_opcodes(&self) -> Vec<Opcode> {
        self.expected.clone()
    }

    fn into_registrations(self) -> Vec<Registration> {
        self.entries
    }
}

/// Instantiate and register every entry of `source`.
///
/// # Errors
/// - a factory fails → `FactoryFailed`
/// - an opcode is registered twice → `DuplicateRegistration`
/// - an expected opcode is not bound → `MissingOpcodes` (ascending)
///
/// The first failure wins and no registry is returned.
pub fn populate<S: RegistrationSource>(source: S) -> Result<HandlerRegistry, RegistryError> {
    let expected = source.expected_opcodes();
    let mut registry = HandlerRegistry::new();

    for registration in source.into_registrations() {
        let opcode = registration.opcode();
        let (handler, descriptor) = registration.instantiate()?;
        let name = descriptor.name().to_string();
        registry.register(opcode, handler, descriptor)?;
        debug!(%opcode, descriptor = %name, "handler registered");
    }

    let mut missing: Vec<Opcode> = expected
        .into_iter()
        .filter(|opcode| !registry.contains(*opcode))
        .collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        missing.dedup();
        return Err(RegistryError::MissingOpcodes(missing));
    }

    Ok(registry)
}
