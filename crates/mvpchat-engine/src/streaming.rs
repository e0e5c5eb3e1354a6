//! Server-sent events reader for prediction output streams.

use std::io;

use futures_util::stream::{self, Stream, TryStreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

struct SseState<R> {
    lines: tokio::io::Lines<R>,
    done: bool,
}

/// Buffered reader over a streaming HTTP body.
pub fn response_reader(response: reqwest::Response) -> impl AsyncBufRead + Unpin + Send + 'static {
    let bytes = Box::pin(response.bytes_stream().map_err(io::Error::other));
    BufReader::new(StreamReader::new(bytes))
}

/// Lazily parses SSE frames. An event is dispatched on a blank line, or at
/// end of input if data is pending. Only one space after the field colon is
/// stripped, so whitespace-leading tokens keep their spaces.
pub fn sse_events<R>(reader: R) -> impl Stream<Item = io::Result<SseEvent>> + Send + 'static
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let state = SseState {
        lines: reader.lines(),
        done: false,
    };
    stream::try_unfold(state, |mut state| async move {
        if state.done {
            return Ok::<_, io::Error>(None);
        }
        let mut event: Option<String> = None;
        let mut data: Option<String> = None;
        loop {
            let Some(line) = state.lines.next_line().await? else {
                state.done = true;
                return Ok(data.map(|data| (SseEvent { event, data }, state)));
            };
            if line.is_empty() {
                if let Some(data) = data.take() {
                    return Ok(Some((SseEvent { event, data }, state)));
                }
                event = None;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line.as_str(), ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => match data.as_mut() {
                    Some(buffer) => {
                        buffer.push('\n');
                        buffer.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                _ => {}
            }
        }
    })
}
