//! Line framing for streamed HTTP bodies (SSE and NDJSON).

use futures::StreamExt;
use futures::stream::{BoxStream, Stream};

use super::provider::ProviderError;

struct LineState<B, E> {
    inner: BoxStream<'static, Result<B, E>>,
    buffer: Vec<u8>,
    done: bool,
}

/// Split a byte stream into lines without their terminators. A trailing
/// unterminated line is yielded when the body ends. The first transport
/// error ends the stream.
pub fn byte_lines<S, B, E>(bytes: S) -> BoxStream<'static, Result<String, ProviderError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let state = LineState {
        inner: bytes.boxed(),
        buffer: Vec::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                return Some((Ok(text), state));
            }

            if state.done {
                if state.buffer.is_empty() {
                    return None;
                }
                let text = String::from_utf8_lossy(&state.buffer).trim_end().to_string();
                state.buffer.clear();
                return Some((Ok(text), state));
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(err)) => {
                    state.done = true;
                    state.buffer.clear();
                    return Some((Err(err.into()), state));
                }
                None => state.done = true,
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> Vec<Result<&'static [u8], ProviderError>> {
        parts.iter().map(|p| Ok(p.as_bytes())).collect()
    }

    #[tokio::test]
    async fn reassembles_lines_across_chunks() {
        let stream = futures::stream::iter(chunks(&["data: one\r\nda", "ta: two\n\n", "tail"]));
        let lines: Vec<String> = byte_lines(stream)
            .map(|line| line.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["data: one", "data: two", "", "tail"]);
    }

    #[tokio::test]
    async fn error_ends_stream() {
        let items: Vec<Result<&'static [u8], ProviderError>> = vec![
            Ok(b"first\n".as_slice()),
            Err(ProviderError::InvalidFormat("boom".to_string())),
            Ok(b"never\n".as_slice()),
        ];
        let results: Vec<_> = byte_lines(futures::stream::iter(items)).collect().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "first");
        assert!(results[1].is_err());
    }
}
