//! Shorthands for the recorder's destination protocol.

/// Announces a destination and makes one call through a recorder's client.
///
/// Expands to [`Recorder::set_destination`](crate::Recorder::set_destination)
/// followed by [`Recorder::client`](crate::Recorder::client) and the method
/// call, evaluating to `Result<(), ProtocolError>`. The typed call's own
/// reply is discarded; inside a session it carries nothing.
///
/// # Example
///
/// ```ignore
/// recorder.open(&queue, || {
///     capture!(recorder, &enabled => get_deposit_enabled(None))?;
///     capture!(recorder, &fee => get_fee(None, 3))?;
///     Ok(())
/// })?;
/// ```
#[macro_export]
macro_rules! capture {
    ($recorder:expr, $slot:expr => $method:ident ( $($arg:expr),* $(,)? )) => {{
        let recorder = &$recorder;
        recorder.set_destination($slot).and_then(|()| {
            recorder.client().map(|client| {
                let _ = client.$method($($arg),*);
            })
        })
    }};
}

/// Builds the dynamic argument list of a prepared call.
///
/// # Example
///
/// ```rust
/// use callbatch_client::args;
/// let args = args![5, "rocketDepositPool", true];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    [$($expr:expr),* $(,)?] => {
        vec![$($crate::serde_json::json!($expr)),*]
    };
}
