/// A chat completion event stream as sent by an OpenAI compatible upstream,
/// including a trailing usage report and the terminator line.
pub fn sse_fixture() -> &'static str {
    return r#"data: {"id":"cmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"role":"assistant","content":"Hello "}}]}

data: {"id":"cmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"world"}}]}

data: {"id":"cmpl-1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"!"},"finish_reason":"stop"}],"usage":{"prompt_tokens":9,"completion_tokens":3,"total_tokens":12}}

data: [DONE]
"#;
}

/// A small evaluation dataset in JSONL form.
pub fn dataset_fixture() -> &'static str {
    return r#"{"id":"math-1","user":"What is 2 + 2?","expect_contains":["4"]}
{"id":"mock-1","user":"Describe yourself.","expect_contains":["streaming","mock"]}
{"id":"colors-1","user":"Name a primary color.","expect_contains":["red","blue","yellow"]}

{"id":"explicit-1","user":"Say hello.","expect_contains":["great","missing"],"match_mode":"any"}
"#;
}
