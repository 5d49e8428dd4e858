/// Audit macro for key-set disclosure events.
///
/// Wraps `tracing::info!` and adds `audit=true`, `auditType="keyset"` and
/// the current request context, including the tenant the request was
/// addressed to, to the event.
///
/// # Examples
///
/// ```ignore
/// audit!(keys = 3, "published key-set");
/// ```
#[macro_export]
macro_rules! audit {
    ($($arg:tt)+) => {
        $crate::middleware::with_request_info(|ctx| {
            tracing::info!(
                audit = true,
                auditType = "keyset",
                endpoint = %ctx.endpoint,
                tenant = %ctx.tenant,
                requestId = %ctx.request_id,
                httpMethod = %ctx.method,
                $($arg)+
            )
        })
    };
}
