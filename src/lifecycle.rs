//! Invocation handle lifecycle: one shared handle, or a fresh one per message.

use crate::binding::BindingEngine;
use crate::config::SoapServiceConfig;
use crate::dispatch::{apply_timeouts, Dispatch, DispatchConfig};
use crate::error::{BindingError, CallError};
use crate::message::AdapterMessage;
use crate::secret::PasswordDecoder;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// How invocation handles are obtained for each call.
pub enum DispatchStrategy {
    Persistent(PersistentDispatch),
    PerMessage(PerMessageDispatch),
}

impl DispatchStrategy {
    /// Build the strategy selected by `per_message_dispatch`.
    pub fn build(
        config: &SoapServiceConfig,
        engine: Arc<dyn BindingEngine>,
        decoder: Arc<dyn PasswordDecoder>,
    ) -> Result<Self, BindingError> {
        if config.per_message_dispatch {
            Ok(Self::PerMessage(PerMessageDispatch::new(config, engine, decoder)?))
        } else {
            Ok(Self::Persistent(PersistentDispatch::new(config, engine.as_ref(), decoder.as_ref())?))
        }
    }

    /// Obtain the handle for one call.
    pub fn dispatch(&self, message: &dyn AdapterMessage) -> Result<Dispatch, CallError> {
        match self {
            Self::Persistent(strategy) => Ok(strategy.dispatch()),
            Self::PerMessage(strategy) => strategy.dispatch(message),
        }
    }

    /// Number of handles built so far.
    pub fn builds(&self) -> u64 {
        match self {
            Self::Persistent(strategy) => strategy.builds(),
            Self::PerMessage(strategy) => strategy.builds(),
        }
    }

    pub fn is_per_message(&self) -> bool {
        matches!(self, Self::PerMessage(_))
    }
}

/// One handle built at initialization and shared by every call.
///
/// Calls receive a clone, so handlers registered for one call never reach
/// the shared handle.
pub struct PersistentDispatch {
    dispatch: Dispatch,
    builds: AtomicU64,
}

impl PersistentDispatch {
    pub fn new(
        config: &SoapServiceConfig,
        engine: &dyn BindingEngine,
        decoder: &dyn PasswordDecoder,
    ) -> Result<Self, BindingError> {
        let port = engine.bind(&config.endpoint())?;
        let mut dispatch = Dispatch::new(port);

        let context = dispatch.request_context_mut();
        DispatchConfig::SoapAction.apply(context, || config.soap_action.clone());
        DispatchConfig::EndpointAddress.apply(context, || config.endpoint_address());
        DispatchConfig::Username.apply(context, || config.username.clone());
        DispatchConfig::Password.apply(context, || decoder.plaintext(&config.password));
        apply_timeouts(context, config.timeouts());

        debug!(address = %dispatch.endpoint_address(), "Built persistent dispatch");

        Ok(Self {
            dispatch,
            builds: AtomicU64::new(1),
        })
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch.clone()
    }

    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

/// A fresh handle for every call, configured from the message.
pub struct PerMessageDispatch {
    config: SoapServiceConfig,
    engine: Arc<dyn BindingEngine>,
    decoder: Arc<dyn PasswordDecoder>,
    builds: AtomicU64,
}

impl PerMessageDispatch {
    pub fn new(
        config: &SoapServiceConfig,
        engine: Arc<dyn BindingEngine>,
        decoder: Arc<dyn PasswordDecoder>,
    ) -> Result<Self, BindingError> {
        warn!(
            service = %config.service_name,
            "Per-message dispatch enabled: the WSDL is resolved for every message, which is expensive"
        );
        // Fail at initialization when the port cannot be resolved at all.
        engine.bind(&config.endpoint())?;
        Ok(Self {
            config: config.clone(),
            engine,
            decoder,
            builds: AtomicU64::new(0),
        })
    }

    pub fn dispatch(&self, message: &dyn AdapterMessage) -> Result<Dispatch, CallError> {
        let config = &self.config;
        let port = self.engine.bind(&config.endpoint())?;
        self.builds.fetch_add(1, Ordering::Relaxed);

        let mut dispatch = Dispatch::new(port);
        let context = dispatch.request_context_mut();
        DispatchConfig::SoapAction.apply(context, || message.resolve(&config.soap_action));
        DispatchConfig::EndpointAddress
            .apply(context, || message.resolve(&config.endpoint_address()));
        DispatchConfig::Username.apply(context, || message.resolve(&config.username));
        DispatchConfig::Password.apply(context, || {
            self.decoder.plaintext(&message.resolve(&config.password))
        });
        apply_timeouts(context, config.timeouts());

        Ok(dispatch)
    }

    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{OutboundRequest, PortBinding};
    use crate::config::ServiceEndpoint;
    use crate::dispatch::properties;
    use crate::message::SoapMessage;
    use crate::secret::{obfuscate, DefaultPasswordDecoder};
    use crate::xml::XmlFragment;
    use std::sync::atomic::AtomicUsize;

    struct StubPort;

    impl PortBinding for StubPort {
        fn address(&self) -> &str {
            "http://localhost/stub"
        }

        fn call(&self, _request: OutboundRequest<'_>) -> Result<XmlFragment, CallError> {
            Ok(XmlFragment::default())
        }
    }

    #[derive(Default)]
    struct CountingEngine {
        binds: AtomicUsize,
    }

    impl BindingEngine for CountingEngine {
        fn bind(&self, _endpoint: &ServiceEndpoint) -> Result<Arc<dyn PortBinding>, BindingError> {
            self.binds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubPort))
        }
    }

    struct FailingEngine;

    impl BindingEngine for FailingEngine {
        fn bind(&self, _endpoint: &ServiceEndpoint) -> Result<Arc<dyn PortBinding>, BindingError> {
            Err(BindingError::WsdlFetch("connection refused".to_string()))
        }
    }

    fn config() -> SoapServiceConfig {
        SoapServiceConfig {
            wsdl_url: "http://localhost/echo?wsdl".to_string(),
            namespace: "http://ws.example.com/".to_string(),
            service_name: "EchoService".to_string(),
            port_name: "EchoPort".to_string(),
            ..Default::default()
        }
    }

    fn build(config: &SoapServiceConfig, engine: Arc<CountingEngine>) -> DispatchStrategy {
        DispatchStrategy::build(config, engine, Arc::new(DefaultPasswordDecoder)).unwrap()
    }

    #[test]
    fn test_persistent_builds_once() {
        let engine = Arc::new(CountingEngine::default());
        let strategy = build(&config(), engine.clone());
        let message = SoapMessage::new("<a/>");
        for _ in 0..5 {
            strategy.dispatch(&message).unwrap();
        }
        assert_eq!(strategy.builds(), 1);
        assert_eq!(engine.binds.load(Ordering::SeqCst), 1);
        assert!(!strategy.is_per_message());
    }

    #[test]
    fn test_per_message_builds_each_call() {
        let engine = Arc::new(CountingEngine::default());
        let mut config = config();
        config.per_message_dispatch = true;
        let strategy = build(&config, engine.clone());
        assert_eq!(strategy.builds(), 0);
        assert_eq!(engine.binds.load(Ordering::SeqCst), 1);

        let message = SoapMessage::new("<a/>");
        for _ in 0..5 {
            strategy.dispatch(&message).unwrap();
        }
        assert_eq!(strategy.builds(), 5);
        assert_eq!(engine.binds.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_persistent_handle_not_mutated_by_calls() {
        let strategy = build(&config(), Arc::new(CountingEngine::default()));
        let message = SoapMessage::new("<a/>");
        let mut first = strategy.dispatch(&message).unwrap();
        crate::handler::register_headers(vec![], &mut first);
        assert_eq!(first.handler_chain().len(), 1);

        let second = strategy.dispatch(&message).unwrap();
        assert!(second.handler_chain().is_empty());
    }

    #[test]
    fn test_persistent_static_items() {
        let mut config = config();
        config.soap_action = "urn:performEcho".to_string();
        config.username = "user".to_string();
        config.password = obfuscate("secret");
        config.wsdl_port_url = "http://legacy/echo".to_string();
        let strategy = build(&config, Arc::new(CountingEngine::default()));

        let dispatch = strategy.dispatch(&SoapMessage::new("<a/>")).unwrap();
        let ctx = dispatch.request_context();
        assert_eq!(ctx.text(properties::SOAP_ACTION_URI), Some("urn:performEcho"));
        assert_eq!(ctx.text(properties::USERNAME), Some("user"));
        assert_eq!(ctx.text(properties::PASSWORD), Some("secret"));
        assert_eq!(dispatch.endpoint_address(), "http://legacy/echo");
        assert_eq!(ctx.millis(properties::CONNECT_TIMEOUT), Some(10_000));
    }

    #[test]
    fn test_per_message_resolves_from_message() {
        let mut config = config();
        config.per_message_dispatch = true;
        config.soap_action = "%message{action}".to_string();
        config.endpoint_address = "%message{target}".to_string();
        config.password = "%message{pw}".to_string();
        let strategy = build(&config, Arc::new(CountingEngine::default()));

        let mut message = SoapMessage::new("<a/>");
        message.add_metadata("action", "urn:dynamic");
        message.add_metadata("target", "http://elsewhere/echo");
        message.add_metadata("pw", obfuscate("hidden"));

        let dispatch = strategy.dispatch(&message).unwrap();
        let ctx = dispatch.request_context();
        assert_eq!(ctx.text(properties::SOAP_ACTION_URI), Some("urn:dynamic"));
        assert_eq!(dispatch.endpoint_address(), "http://elsewhere/echo");
        assert_eq!(ctx.text(properties::PASSWORD), Some("hidden"));
    }

    #[test]
    fn test_env_password_same_for_both_strategies() {
        std::env::set_var("ZENTINEL_SOAP_LIFECYCLE_PW", obfuscate("s3cret"));
        let mut config = config();
        config.password = "%env{ZENTINEL_SOAP_LIFECYCLE_PW}".to_string();
        let message = SoapMessage::new("<a/>");

        let persistent = build(&config, Arc::new(CountingEngine::default()));
        let dispatch = persistent.dispatch(&message).unwrap();
        assert_eq!(dispatch.request_context().text(properties::PASSWORD), Some("s3cret"));

        config.per_message_dispatch = true;
        let per_message = build(&config, Arc::new(CountingEngine::default()));
        let dispatch = per_message.dispatch(&message).unwrap();
        assert_eq!(dispatch.request_context().text(properties::PASSWORD), Some("s3cret"));
    }

    #[test]
    fn test_per_message_env_password_from_metadata() {
        std::env::set_var("ZENTINEL_SOAP_ROUTED_PW", "routed");
        let mut config = config();
        config.per_message_dispatch = true;
        config.password = "%message{pw}".to_string();
        let strategy = build(&config, Arc::new(CountingEngine::default()));

        let mut message = SoapMessage::new("<a/>");
        message.add_metadata("pw", "%env{ZENTINEL_SOAP_ROUTED_PW}");
        let dispatch = strategy.dispatch(&message).unwrap();
        assert_eq!(dispatch.request_context().text(properties::PASSWORD), Some("routed"));
    }

    #[test]
    fn test_per_message_missing_metadata_skips_item() {
        let mut config = config();
        config.per_message_dispatch = true;
        config.username = "%message{user}".to_string();
        let strategy = build(&config, Arc::new(CountingEngine::default()));

        let dispatch = strategy.dispatch(&SoapMessage::new("<a/>")).unwrap();
        assert_eq!(dispatch.request_context().text(properties::USERNAME), None);
        assert_eq!(dispatch.endpoint_address(), "http://localhost/stub");
    }

    #[test]
    fn test_persistent_bind_failure() {
        let result = DispatchStrategy::build(
            &config(),
            Arc::new(FailingEngine),
            Arc::new(DefaultPasswordDecoder),
        );
        assert!(matches!(result, Err(BindingError::WsdlFetch(_))));
    }

    #[test]
    fn test_per_message_bind_failure_at_initialization() {
        let mut config = config();
        config.per_message_dispatch = true;
        let result = DispatchStrategy::build(
            &config,
            Arc::new(FailingEngine),
            Arc::new(DefaultPasswordDecoder),
        );
        assert!(matches!(result, Err(BindingError::WsdlFetch(_))));
    }

    /// Binds once, then fails.
    #[derive(Default)]
    struct FlakyEngine {
        binds: AtomicUsize,
    }

    impl BindingEngine for FlakyEngine {
        fn bind(&self, _endpoint: &ServiceEndpoint) -> Result<Arc<dyn PortBinding>, BindingError> {
            if self.binds.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Arc::new(StubPort))
            } else {
                Err(BindingError::WsdlFetch("connection refused".to_string()))
            }
        }
    }

    #[test]
    fn test_per_message_rebind_failure_is_call_error() {
        let mut config = config();
        config.per_message_dispatch = true;
        let strategy = DispatchStrategy::build(
            &config,
            Arc::new(FlakyEngine::default()),
            Arc::new(DefaultPasswordDecoder),
        )
        .unwrap();
        let err = strategy.dispatch(&SoapMessage::new("<a/>")).unwrap_err();
        assert!(matches!(err, CallError::Dispatch(_)));
        assert_eq!(strategy.builds(), 0);
    }
}
