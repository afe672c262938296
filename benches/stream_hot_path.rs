use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;

use vision_gateway::config::ToolConfig;
use vision_gateway::fc::{ToolCallExtractor, ToolRegistry};
use vision_gateway::protocol::canonical::{FinishMetadata, StreamEvent};
use vision_gateway::protocol::dashscope::stream::DashscopeAdapter;
use vision_gateway::protocol::openai_chat::stream::OpenAiChatAdapter;
use vision_gateway::replies::accumulate_text;
use vision_gateway::stream::{encode_event, SseEvent, SseParser, StreamAdapter, StreamState};

fn openai_frames(count: usize) -> Vec<SseEvent> {
    (0..count)
        .map(|i| SseEvent {
            event: None,
            data: json!({"choices":[{"delta":{"content":format!("token {i} ")}}]}).to_string(),
        })
        .collect()
}

fn dashscope_lines(count: usize) -> Vec<String> {
    (0..count)
        .flat_map(|i| {
            [
                format!("id:{i}"),
                "event:result".to_string(),
                ":HTTP_STATUS/200".to_string(),
                format!(
                    "data:{}",
                    json!({"output":{"choices":[{"message":{"content":[{"text":format!("{i},")}]}}]}})
                ),
                String::new(),
            ]
        })
        .collect()
}

fn bench_sse_parse(c: &mut Criterion) {
    let body: String = openai_frames(256)
        .iter()
        .map(|f| format!("data: {}\n\n", f.data))
        .collect();
    c.bench_function("sse_parse_openai_256_frames_64b_chunks", |b| {
        b.iter(|| {
            let mut parser = SseParser::new();
            let mut out = Vec::with_capacity(256);
            for chunk in body.as_bytes().chunks(64) {
                // Chunks are ASCII so every boundary is a char boundary.
                if let Ok(text) = std::str::from_utf8(chunk) {
                    parser.feed_into(text, &mut out);
                }
            }
            black_box(out.len());
        });
    });
}

fn bench_openai_adapter(c: &mut Criterion) {
    let frames = openai_frames(256);
    c.bench_function("openai_adapter_256_text_frames", |b| {
        b.iter(|| {
            let mut adapter = OpenAiChatAdapter::new("gpt-5-mini");
            let mut state = StreamState::new("msg-bench".to_string());
            let mut out = Vec::with_capacity(300);
            for frame in &frames {
                adapter.on_chunk(frame.clone(), &mut state, &mut out);
            }
            adapter.on_end(&mut state, &mut out);
            black_box(out.len());
        });
    });
}

fn bench_dashscope_adapter(c: &mut Criterion) {
    let lines = dashscope_lines(128);
    c.bench_function("dashscope_adapter_128_results", |b| {
        b.iter(|| {
            let mut adapter = DashscopeAdapter::new("qwen3-vl-flash");
            let mut state = StreamState::new("msg-bench".to_string());
            let mut out = Vec::with_capacity(140);
            for line in &lines {
                adapter.on_chunk(line.clone(), &mut state, &mut out);
            }
            adapter.on_end(&mut state, &mut out);
            black_box(out.len());
        });
    });
}

fn bench_tool_extractor(c: &mut Criterion) {
    let registry = Arc::new(ToolRegistry::from_config(&[ToolConfig {
        name: "open_url".to_string(),
        argument_schema: json!({"type": "object"}),
    }]));
    let deltas: Vec<String> = (0..200)
        .map(|i| {
            if i == 100 {
                "<invoke name=\"open_url\">{\"url\":\"https://example.com\"}</invoke>".to_string()
            } else {
                format!("word{i} <b>ok</b> ")
            }
        })
        .collect();

    c.bench_function("tool_extractor_200_deltas_one_call", |b| {
        b.iter(|| {
            let Some(mut extractor) = ToolCallExtractor::for_registry(&registry) else {
                return;
            };
            let mut state = StreamState::new("msg-bench".to_string());
            let block_id = state.next_block_id();
            let mut events = Vec::with_capacity(deltas.len() + 2);
            events.push(StreamEvent::TextStart {
                block_id: block_id.clone(),
            });
            events.extend(deltas.iter().map(|delta| StreamEvent::TextDelta {
                block_id: block_id.clone(),
                delta: delta.clone(),
            }));
            events.push(StreamEvent::TextEnd { block_id });
            events.push(StreamEvent::Finish {
                metadata: FinishMetadata::default(),
            });
            let mut out = Vec::with_capacity(events.len() + 8);
            extractor.process(events, &mut state, &mut out);
            black_box(out.len());
        });
    });
}

fn bench_emitter_encode(c: &mut Criterion) {
    let events: Vec<StreamEvent> = (0..256)
        .map(|i| StreamEvent::TextDelta {
            block_id: "text-1".to_string(),
            delta: format!("line {i} with \"quotes\" and \\ slashes\n"),
        })
        .collect();
    c.bench_function("emitter_encode_256_text_deltas", |b| {
        let mut out = String::with_capacity(32 * 1024);
        b.iter(|| {
            out.clear();
            for event in &events {
                encode_event(black_box(event), &mut out);
            }
            black_box(out.len());
        });
    });

    let mut wire = String::new();
    for event in &events {
        encode_event(event, &mut wire);
    }
    c.bench_function("accumulate_text_256_frames", |b| {
        b.iter(|| black_box(accumulate_text(black_box(&wire))).len());
    });
}

criterion_group!(
    benches,
    bench_sse_parse,
    bench_openai_adapter,
    bench_dashscope_adapter,
    bench_tool_extractor,
    bench_emitter_encode
);
criterion_main!(benches);
