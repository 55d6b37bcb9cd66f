use crate::error::WardenError;
use crate::logs::SharedSink;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// How long an ended attempt waits for its forwarders to reach end-of-stream
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Copy lines from `reader` into `sink` until end-of-stream
///
/// Lines may be of any length; bytes that are not UTF-8 are replaced. A final
/// line without a terminator is still delivered. A read error is offered once
/// to `errors` without waiting and ends the forwarder.
pub async fn forward_lines<R>(reader: R, sink: SharedSink, errors: mpsc::Sender<WardenError>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                // EOF - child closed the stream
                return;
            }
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                sink.write_line(&String::from_utf8_lossy(&line));
            }
            Err(e) => {
                if errors.try_send(WardenError::Forward(e)).is_err() {
                    debug!("error channel unavailable, dropping forwarder error");
                }
                return;
            }
        }
    }
}

/// Spawn a forwarder task
pub fn spawn_forwarder<R>(
    reader: R,
    sink: SharedSink,
    errors: mpsc::Sender<WardenError>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(forward_lines(reader, sink, errors))
}

/// Wait for forwarders to finish, aborting any still running after `grace`
///
/// A grandchild that inherited the pipe can keep it open after the child is
/// gone; such forwarders are cut off rather than carried into the next attempt.
pub async fn drain(handles: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    for mut handle in handles {
        if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
            debug!("forwarder still open after {:?}, aborting", grace);
            handle.abort();
        }
    }
}
