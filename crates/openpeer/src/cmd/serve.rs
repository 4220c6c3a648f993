use std::sync::Arc;
use std::time::Duration;

use openpeer_channel::{from_args, Bindings, Channel, ChannelConfig, OperationError};
use openpeer_frame::StreamTransport;
use openpeer_transport::UnixDomainSocket;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cmd::ServeArgs;
use crate::exit::{channel_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_push, OutputFormat};

pub async fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let socket =
        UnixDomainSocket::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;
    info!(path = %socket.path().display(), types = ?args.types, "serving");

    let mut sessions: Vec<Channel> = Vec::new();
    let mut accepted: u64 = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = socket.accept() => {
                let stream = match accepted {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                accepted += 1;
                let name = format!("session-{accepted}");
                let session = open_session(&name, stream, &args.types, format)?;
                info!(session = %name, "peer connected");
                let ended = prune(&mut sessions);
                if ended > 0 {
                    debug!(ended, live = sessions.len(), "dropped finished sessions");
                }
                sessions.push(session);
            }
            signal = &mut shutdown => {
                signal.map_err(|err| {
                    CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
                })?;
                info!("shutting down");
                break;
            }
        }
    }

    for session in &sessions {
        session.destroy();
    }
    Ok(SUCCESS)
}

fn open_session(
    name: &str,
    stream: tokio::net::UnixStream,
    types: &[String],
    format: OutputFormat,
) -> CliResult<Channel> {
    let channel = Channel::open(
        Arc::new(StreamTransport::new(stream)),
        ChannelConfig::named(name),
    )
    .map_err(|err| channel_error("session open failed", err))?;
    channel
        .register(builtin_operations())
        .map_err(|err| channel_error("session open failed", err))?;

    for message_type in types {
        let session = name.to_string();
        let printed_type = message_type.clone();
        channel
            .message(message_type, move |message| {
                print_push(&session, &printed_type, message, format)
            })
            .map_err(|err| channel_error("session open failed", err))?;
    }
    Ok(channel)
}

/// Forget sessions whose client went away. Returns how many were dropped.
fn prune(sessions: &mut Vec<Channel>) -> usize {
    let before = sessions.len();
    sessions.retain(|session| !session.is_destroyed());
    before - sessions.len()
}

/// Operations every served session exposes.
pub fn builtin_operations() -> Bindings {
    Bindings::new()
        .function("echo", |args| Ok(Value::Array(args)))
        .function("add", add)
        .function("concat", |args| {
            let parts: Vec<String> = from_args(args)?;
            Ok(parts.concat())
        })
        .async_function("sleep", |args| async move {
            let (ms,): (u64,) = from_args(args)?;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, OperationError>(ms)
        })
}

// Integer sum when every argument is an integer, float sum otherwise.
fn add(args: Vec<Value>) -> Result<Value, OperationError> {
    if let Ok(integers) = from_args::<Vec<i64>>(args.clone()) {
        return integers
            .into_iter()
            .try_fold(0i64, i64::checked_add)
            .map(Value::from)
            .ok_or_else(|| OperationError::new("integer overflow"));
    }
    let numbers: Vec<f64> = from_args(args)?;
    Ok(Value::from(numbers.into_iter().sum::<f64>()))
}

#[cfg(test)]
mod tests {
    use openpeer_channel::{CallRequest, ExecutionContext};
    use serde_json::json;

    use super::*;

    async fn run_builtin(name: &str, args: Vec<Value>) -> Result<Value, Value> {
        let context = ExecutionContext::new();
        context.register(builtin_operations());
        context
            .execute(CallRequest {
                name: name.to_string(),
                args,
            })
            .await
    }

    #[tokio::test]
    async fn session_ends_when_client_hangs_up() {
        let (server_side, client_side) = tokio::net::UnixStream::pair().unwrap();
        let session =
            open_session("session-1", server_side, &["*".to_string()], OutputFormat::Raw).unwrap();
        let mut sessions = vec![session.clone()];
        assert_eq!(prune(&mut sessions), 0);

        drop(client_side);
        for _ in 0..200 {
            if session.is_destroyed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(session.is_destroyed());
        assert_eq!(prune(&mut sessions), 1);
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn add_keeps_integers_integral() {
        assert_eq!(run_builtin("add", vec![json!(2), json!(3)]).await, Ok(json!(5)));
        assert_eq!(run_builtin("add", vec![json!(1.5), json!(2)]).await, Ok(json!(3.5)));
        assert_eq!(run_builtin("add", vec![]).await, Ok(json!(0)));
    }

    #[tokio::test]
    async fn add_rejects_non_numbers() {
        let outcome = run_builtin("add", vec![json!("x")]).await;
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn add_reports_overflow() {
        let outcome = run_builtin("add", vec![json!(i64::MAX), json!(1)]).await;
        assert_eq!(outcome, Err(json!("integer overflow")));
    }

    #[tokio::test]
    async fn echo_concat_and_sleep() {
        assert_eq!(
            run_builtin("echo", vec![json!(1), json!("a")]).await,
            Ok(json!([1, "a"]))
        );
        assert_eq!(
            run_builtin("concat", vec![json!("open"), json!("peer")]).await,
            Ok(json!("openpeer"))
        );
        assert_eq!(run_builtin("sleep", vec![json!(1)]).await, Ok(json!(1)));
    }
}
