//! SOAP service invocation engine.
//!
//! Ties together the handle lifecycle, metadata header injection, payload
//! parsing and response transformation.

use crate::binding::BindingEngine;
use crate::config::SoapServiceConfig;
use crate::error::{CallError, SoapServiceError};
use crate::dispatch::Dispatch;
use crate::handler::{register, register_headers, LoggingHandler};
use crate::http::HttpBindingEngine;
use crate::lifecycle::DispatchStrategy;
use crate::message::AdapterMessage;
use crate::metadata::{build_filter, MetadataFilter};
use crate::secret::{DefaultPasswordDecoder, PasswordDecoder};
use crate::transform::{build_transformer, Transformer};
use crate::wsdl::parse_location;
use crate::xml::read_payload;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters reported by [`SoapService::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub invocations: u64,
    pub failures: u64,
    pub dispatch_builds: u64,
}

enum State {
    Uninitialized,
    Initialized(Engine),
    Closed,
}

struct Engine {
    strategy: DispatchStrategy,
    transformer: Box<dyn Transformer>,
    filter: Box<dyn MetadataFilter>,
}

/// Calls one operation of a WSDL-described SOAP service.
pub struct SoapService {
    config: SoapServiceConfig,
    binding: Arc<dyn BindingEngine>,
    decoder: Arc<dyn PasswordDecoder>,
    state: State,
    invocations: AtomicU64,
    failures: AtomicU64,
}

impl SoapService {
    /// Service over the HTTP binding engine.
    pub fn new(config: SoapServiceConfig) -> Self {
        let fetch_timeouts = config.timeouts();
        Self::with_engine(config, Arc::new(HttpBindingEngine { fetch_timeouts }))
    }

    pub fn with_engine(config: SoapServiceConfig, binding: Arc<dyn BindingEngine>) -> Self {
        Self {
            config,
            binding,
            decoder: Arc::new(DefaultPasswordDecoder),
            state: State::Uninitialized,
            invocations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Replace the password decoder. Takes effect on the next `initialize`.
    pub fn with_password_decoder(mut self, decoder: Arc<dyn PasswordDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &SoapServiceConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized(_))
    }

    /// Validate the configuration and bind to the remote port.
    ///
    /// On failure the service stays unusable.
    pub fn initialize(&mut self) -> Result<(), SoapServiceError> {
        self.state = State::Uninitialized;
        self.config.validate().map_err(SoapServiceError::Config)?;

        let strategy = parse_location(&self.config.wsdl_url)
            .and_then(|_| {
                DispatchStrategy::build(&self.config, self.binding.clone(), self.decoder.clone())
            })
            .map_err(|source| SoapServiceError::Initialization {
                wsdl_url: self.config.wsdl_url.clone(),
                source,
            })?;

        let engine = Engine {
            strategy,
            transformer: build_transformer(self.config.use_fallback_transformer),
            filter: build_filter(&self.config.metadata_filter),
        };

        info!(
            service = %self.config.service_name,
            port = %self.config.port_name,
            per_message_dispatch = engine.strategy.is_per_message(),
            fallback_transformer = self.config.use_fallback_transformer,
            "SOAP service initialized"
        );

        self.state = State::Initialized(engine);
        Ok(())
    }

    /// Call the service with the message payload and replace the payload with
    /// the response body.
    ///
    /// The payload is left untouched when the call fails.
    pub fn invoke(&self, message: &mut dyn AdapterMessage) -> Result<(), SoapServiceError> {
        let State::Initialized(engine) = &self.state else {
            return Err(SoapServiceError::NotInitialized);
        };

        self.invocations.fetch_add(1, Ordering::Relaxed);

        match self.call(engine, message) {
            Ok(()) => Ok(()),
            Err(source) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    service = %self.config.service_name,
                    port = %self.config.port_name,
                    error = %source,
                    "SOAP invocation failed"
                );
                Err(SoapServiceError::Invocation {
                    service: self.config.service_name.clone(),
                    port: self.config.port_name.clone(),
                    source,
                })
            }
        }
    }

    /// Handle for one call, with the message's headers registered.
    fn prepare(&self, engine: &Engine, message: &dyn AdapterMessage) -> Result<Dispatch, CallError> {
        let mut dispatch = engine.strategy.dispatch(message)?;
        register_headers(engine.filter.filter(message), &mut dispatch);
        // Last in the chain so it sees the injected headers.
        if self.config.enable_debug {
            register(&mut dispatch, Arc::new(LoggingHandler));
        }
        Ok(dispatch)
    }

    fn call(&self, engine: &Engine, message: &mut dyn AdapterMessage) -> Result<(), CallError> {
        let dispatch = self.prepare(engine, message)?;

        let mut input = Vec::new();
        message.input().read_to_end(&mut input)?;
        let payload = read_payload(&input)?;

        debug!(
            operation = %payload.root(),
            namespace = payload.root_namespace().unwrap_or_default(),
            address = %dispatch.endpoint_address(),
            "Invoking SOAP operation"
        );

        let response = dispatch.invoke(&payload)?;

        let mut buffer = Vec::new();
        engine.transformer.transform(&response, &mut buffer)?;

        let mut output = message.output();
        output.write_all(&buffer)?;
        output.flush()?;
        Ok(())
    }

    /// Release the handles. The service must be initialized again before use.
    pub fn close(&mut self) {
        if self.is_initialized() {
            debug!(service = %self.config.service_name, "Closing SOAP service");
        }
        self.state = State::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    pub fn stats(&self) -> ServiceStats {
        let dispatch_builds = match &self.state {
            State::Initialized(engine) => engine.strategy.builds(),
            _ => 0,
        };
        ServiceStats {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dispatch_builds,
        }
    }
}
