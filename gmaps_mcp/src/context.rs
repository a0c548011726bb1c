//! Request-scoped context.
//!
//! Makes the resolved API key and session id available to code invoked
//! transitively during one request — most importantly the tool layer, which
//! must never pick up another session's credential under concurrent load.
//!
//! Implemented over `tokio::task_local!` rather than any form of global:
//! the value is bound to the dynamic extent of the single future handling
//! one request (including everything it awaits), and concurrently running
//! scopes are invisible to each other. The previous scope (or the absence
//! of one) is restored when the future completes, on success or failure.

use std::future::Future;

/// The per-request value: resolved credential plus session affinity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Credential resolved by [`crate::credentials::ApiKeyResolver`];
    /// `None` means no credential was available at any precedence level.
    pub api_key: Option<String>,
    /// Session this request belongs to, if any (`None` in stdio mode
    /// before a session concept exists).
    pub session_id: Option<String>,
}

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Run `fut` with `ctx` established for its entire dynamic extent.
pub async fn run_scoped<F>(ctx: RequestContext, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_CONTEXT.scope(ctx, fut).await
}

/// Read the innermost active context, from arbitrary call depth.
/// Returns `None` outside any scoped region.
pub fn current() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(Clone::clone).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn current_is_none_outside_scope() {
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn scope_establishes_and_restores_context() {
        let ctx = RequestContext {
            api_key: Some("key-a".into()),
            session_id: Some("sess-1".into()),
        };
        run_scoped(ctx.clone(), async {
            assert_eq!(current(), Some(ctx));
        })
        .await;
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn nested_scopes_shadow_and_restore() {
        let outer = RequestContext {
            api_key: Some("outer".into()),
            session_id: None,
        };
        let inner = RequestContext {
            api_key: Some("inner".into()),
            session_id: None,
        };
        run_scoped(outer.clone(), async {
            run_scoped(inner.clone(), async {
                assert_eq!(current().unwrap().api_key.as_deref(), Some("inner"));
            })
            .await;
            assert_eq!(current().unwrap().api_key.as_deref(), Some("outer"));
        })
        .await;
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        // Two tasks interleave across an await point; each must observe
        // only its own context value.
        let barrier = std::sync::Arc::new(Barrier::new(2));

        let spawn_scoped = |key: &'static str, barrier: std::sync::Arc<Barrier>| {
            tokio::spawn(run_scoped(
                RequestContext {
                    api_key: Some(key.to_string()),
                    session_id: Some(key.to_string()),
                },
                async move {
                    for _ in 0..16 {
                        barrier.wait().await;
                        let seen = current().expect("context must be present");
                        assert_eq!(seen.api_key.as_deref(), Some(key));
                        assert_eq!(seen.session_id.as_deref(), Some(key));
                    }
                },
            ))
        };

        let a = spawn_scoped("key-a", barrier.clone());
        let b = spawn_scoped("key-b", barrier);
        a.await.unwrap();
        b.await.unwrap();
    }

    #[tokio::test]
    async fn context_survives_spawned_await_points() {
        run_scoped(
            RequestContext {
                api_key: Some("deep".into()),
                session_id: None,
            },
            async {
                tokio::task::yield_now().await;
                async fn deep() -> Option<String> {
                    tokio::task::yield_now().await;
                    current().and_then(|c| c.api_key)
                }
                assert_eq!(deep().await.as_deref(), Some("deep"));
            },
        )
        .await;
    }
}
