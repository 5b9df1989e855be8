//! Partial handlers and their "first to claim wins" composition.
//!
//! A [`PartialHandler`] looks at an input and either declines it or claims it.
//! A [`HandlerChain`] tries its members in order and returns the outcome of the
//! first one that claims the input, untouched. The same primitive composes
//! event handlers and the follow-up steps of a modal flow.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("no flow registered for identifier `{0}`")]
    RoutingMiss(String),
    #[error("failed to build response payload: {0}")]
    Marshal(String),
    #[error("could not decode {kind} payload: {message}")]
    Decode { kind: &'static str, message: String },
    #[error("interaction carried no view")]
    MissingView,
    #[error("view update failed: {0}")]
    ViewUpdate(String),
    #[error("message post failed: {0}")]
    Messaging(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(error: serde_json::Error) -> Self {
        Self::Marshal(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerContext {
    pub correlation_id: String,
}

impl HandlerContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into() }
    }
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// What a partial handler did with its input.
///
/// A claimed outcome ends the chain whether or not it carries an error.
#[derive(Clone, Debug, PartialEq)]
pub enum HandlerOutcome {
    Declined,
    Claimed { response: Option<Value>, error: Option<HandlerError> },
}

impl HandlerOutcome {
    pub fn handled() -> Self {
        Self::Claimed { response: None, error: None }
    }

    pub fn respond(response: Value) -> Self {
        Self::Claimed { response: Some(response), error: None }
    }

    pub fn failed(error: HandlerError) -> Self {
        Self::Claimed { response: None, error: Some(error) }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed { .. })
    }

    pub fn response(&self) -> Option<&Value> {
        match self {
            Self::Claimed { response, .. } => response.as_ref(),
            Self::Declined => None,
        }
    }

    pub fn error(&self) -> Option<&HandlerError> {
        match self {
            Self::Claimed { error, .. } => error.as_ref(),
            Self::Declined => None,
        }
    }
}

#[async_trait]
pub trait PartialHandler<I: ?Sized + Sync>: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, input: &I, ctx: &HandlerContext) -> HandlerOutcome;
}

pub struct HandlerChain<I: ?Sized + Sync> {
    handlers: Vec<Arc<dyn PartialHandler<I>>>,
}

impl<I: ?Sized + Sync> HandlerChain<I> {
    pub fn new(handlers: Vec<Arc<dyn PartialHandler<I>>>) -> Self {
        Self { handlers }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|handler| handler.name().to_owned()).collect()
    }
}

#[async_trait]
impl<I> PartialHandler<I> for HandlerChain<I>
where
    I: ?Sized + Sync + 'static,
{
    fn name(&self) -> &str {
        "chain"
    }

    async fn handle(&self, input: &I, ctx: &HandlerContext) -> HandlerOutcome {
        for handler in &self.handlers {
            let outcome = handler.handle(input, ctx).await;
            if outcome.is_claimed() {
                return outcome;
            }
        }
        HandlerOutcome::Declined
    }
}

/// Adapts a synchronous function into a partial handler.
pub struct HandlerFn<I: ?Sized, F> {
    name: String,
    func: F,
    _input: PhantomData<fn(&I)>,
}

impl<I, F> HandlerFn<I, F>
where
    I: ?Sized,
    F: Fn(&I, &HandlerContext) -> HandlerOutcome,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self { name: name.into(), func, _input: PhantomData }
    }
}

#[async_trait]
impl<I, F> PartialHandler<I> for HandlerFn<I, F>
where
    I: ?Sized + Sync + 'static,
    F: Fn(&I, &HandlerContext) -> HandlerOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, input: &I, ctx: &HandlerContext) -> HandlerOutcome {
        (self.func)(input, ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::{
        HandlerChain, HandlerContext, HandlerError, HandlerFn, HandlerOutcome, PartialHandler,
    };

    struct Scripted {
        name: &'static str,
        outcome: HandlerOutcome,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, outcome: HandlerOutcome) -> Arc<Self> {
            Arc::new(Self { name, outcome, calls: AtomicUsize::new(0) })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PartialHandler<str> for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, _input: &str, _ctx: &HandlerContext) -> HandlerOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn chain(handlers: &[Arc<Scripted>]) -> HandlerChain<str> {
        HandlerChain::new(
            handlers.iter().map(|handler| Arc::clone(handler) as Arc<dyn PartialHandler<str>>).collect(),
        )
    }

    #[tokio::test]
    async fn first_claim_is_returned_unmodified() {
        let a = Scripted::new("a", HandlerOutcome::Declined);
        let b = Scripted::new("b", HandlerOutcome::respond(json!({"from": "b"})));
        let c = Scripted::new("c", HandlerOutcome::respond(json!({"from": "c"})));

        let outcome = chain(&[a.clone(), b.clone(), c.clone()]).handle("input", &HandlerContext::default()).await;

        assert_eq!(outcome, HandlerOutcome::respond(json!({"from": "b"})));
        assert_eq!((a.calls(), b.calls(), c.calls()), (1, 1, 0));
    }

    #[tokio::test]
    async fn claimed_error_terminates_chain_and_is_surfaced() {
        let a = Scripted::new("a", HandlerOutcome::failed(HandlerError::Marshal("boom".to_owned())));
        let c = Scripted::new("c", HandlerOutcome::handled());

        let outcome = chain(&[a.clone(), c.clone()]).handle("input", &HandlerContext::default()).await;

        assert_eq!(outcome.error(), Some(&HandlerError::Marshal("boom".to_owned())));
        assert_eq!(c.calls(), 0);
    }

    #[tokio::test]
    async fn unclaimed_input_declines_without_error() {
        let a = Scripted::new("a", HandlerOutcome::Declined);
        let b = Scripted::new("b", HandlerOutcome::Declined);

        let outcome = chain(&[a, b]).handle("input", &HandlerContext::default()).await;

        assert_eq!(outcome, HandlerOutcome::Declined);
        assert!(outcome.error().is_none());
    }

    #[tokio::test]
    async fn empty_chain_declines() {
        let outcome = HandlerChain::<str>::new(Vec::new()).handle("input", &HandlerContext::default()).await;

        assert!(!outcome.is_claimed());
    }

    #[tokio::test]
    async fn chains_nest_and_function_handlers_participate() {
        let inner = HandlerChain::<str>::new(vec![Arc::new(HandlerFn::new(
            "declines",
            |_input: &str, _ctx: &HandlerContext| HandlerOutcome::Declined,
        )) as Arc<dyn PartialHandler<str>>]);
        let echo = HandlerFn::new("echo", |input: &str, ctx: &HandlerContext| {
            HandlerOutcome::respond(json!({"input": input, "correlation_id": ctx.correlation_id}))
        });
        let outer = HandlerChain::<str>::new(vec![
            Arc::new(inner) as Arc<dyn PartialHandler<str>>,
            Arc::new(echo) as Arc<dyn PartialHandler<str>>,
        ]);

        let outcome = outer.handle("hello", &HandlerContext::new("env-1")).await;

        assert_eq!(outcome.response(), Some(&json!({"input": "hello", "correlation_id": "env-1"})));
        assert_eq!(outer.names(), vec!["chain".to_owned(), "echo".to_owned()]);
    }
}
