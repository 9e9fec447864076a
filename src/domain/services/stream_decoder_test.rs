use anyhow::Result;
use bytes::Bytes;
use futures::stream;
use futures::StreamExt;
use test_utils::sse_fixture;

use super::read_to_string;
use super::EventStreamDecoder;
use super::Utf8StreamDecoder;
use crate::domain::models::ByteStream;

mod utf8 {
    use super::*;

    #[test]
    fn it_decodes_ascii_verbatim() {
        let mut decoder = Utf8StreamDecoder::default();
        assert_eq!(decoder.decode(b"Hello "), "Hello ");
        assert_eq!(decoder.decode(b"world"), "world");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn it_holds_back_split_code_points() {
        let bytes = "héllo 👋".as_bytes();
        // "é" is two bytes, the emoji four.
        let (first, rest) = bytes.split_at(2);
        let (second, third) = rest.split_at(rest.len() - 2);

        let mut decoder = Utf8StreamDecoder::default();
        let mut out = "".to_string();
        out += &decoder.decode(first);
        assert_eq!(out, "h");
        out += &decoder.decode(second);
        out += &decoder.decode(third);
        out += &decoder.finish();

        assert_eq!(out, "héllo 👋");
    }

    #[test]
    fn it_replaces_dangling_bytes_on_finish() {
        let mut decoder = Utf8StreamDecoder::default();
        assert_eq!(decoder.decode(&[0x61, 0xE2, 0x82]), "a");
        assert_eq!(decoder.finish(), "\u{FFFD}");

        // Reset after finish.
        assert_eq!(decoder.decode(b"ok"), "ok");
    }
}

mod event_stream {
    use super::*;

    #[test]
    fn it_extracts_delta_content() -> Result<()> {
        let mut decoder = EventStreamDecoder::default();
        let res = decoder.push(sse_fixture().as_bytes())?;
        let tail = decoder.finish()?;

        assert_eq!(res, vec!["Hello ".to_string(), "world".to_string(), "!".to_string()]);
        assert!(tail.is_empty());
        assert_eq!(decoder.usage().unwrap().total_tokens, Some(12));

        return Ok(());
    }

    #[test]
    fn it_buffers_incomplete_lines_across_reads() -> Result<()> {
        let mut decoder = EventStreamDecoder::default();
        let first = decoder.push(br#"data: {"choices":[{"delta":{"content":"Hel"#)?;
        assert!(first.is_empty());

        let second = decoder.push(b"lo\"}}]}\n\ndata: [DONE]\n")?;
        assert_eq!(second, vec!["Hello".to_string()]);

        return Ok(());
    }

    #[test]
    fn it_flushes_a_trailing_line_without_newline() -> Result<()> {
        let mut decoder = EventStreamDecoder::default();
        assert!(decoder
            .push(br#"data: {"choices":[{"delta":{"content":"tail"}}]}"#)?
            .is_empty());
        assert_eq!(decoder.finish()?, vec!["tail".to_string()]);

        return Ok(());
    }

    #[test]
    fn it_falls_back_to_message_content() -> Result<()> {
        let mut decoder = EventStreamDecoder::default();
        let res = decoder.push(b"data: {\"choices\":[{\"message\":{\"content\":\"whole\"}}]}\n")?;
        assert_eq!(res, vec!["whole".to_string()]);

        return Ok(());
    }

    #[test]
    fn it_ignores_blank_lines_comments_and_empty_deltas() -> Result<()> {
        let mut decoder = EventStreamDecoder::default();
        let body = "\n: keep-alive\nevent: message\ndata: {\"choices\":[{\"delta\":{}}]}\ndata: {\"choices\":[]}\ndata: [DONE]\n";
        assert!(decoder.push(body.as_bytes())?.is_empty());
        assert!(decoder.usage().is_none());

        return Ok(());
    }

    #[test]
    fn it_fails_on_malformed_json() {
        let mut decoder = EventStreamDecoder::default();
        let res = decoder.push(b"data: {not json}\n");
        let err = res.unwrap_err().to_string();
        assert!(err.starts_with("Failed to parse streaming chunk"));
    }

    #[test]
    fn it_keeps_the_last_reported_usage() -> Result<()> {
        let mut decoder = EventStreamDecoder::default();
        decoder.push(b"data: {\"choices\":[],\"usage\":{\"total_tokens\":3}}\n")?;
        decoder
            .push(b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":2,\"total_tokens\":9}}\n")?;

        let usage = decoder.usage().unwrap();
        assert_eq!(usage.total_tokens, Some(9));
        assert_eq!(usage.prompt_tokens, Some(2));

        return Ok(());
    }
}

#[tokio::test]
async fn it_reads_byte_streams_to_string() -> Result<()> {
    let bytes = "naïve ✓".as_bytes().to_vec();
    let chunks = bytes
        .iter()
        .map(|byte| return Ok(Bytes::from(vec![*byte])))
        .collect::<Vec<Result<Bytes>>>();
    let stream: ByteStream = stream::iter(chunks).boxed();

    assert_eq!(read_to_string(stream).await?, "naïve ✓");

    return Ok(());
}
