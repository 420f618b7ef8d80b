use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use rfrender::engine::CAPTURE_DOCUMENT_SCRIPT;
use rfrender::{
    Dispatcher, EngineAdapter, EngineListener, EvalCallback, NavigationRequest, RenderRequest,
    RendererConfig, Result, ScriptValue, DONE_MESSAGE,
};

const PAGE: &str = r#"<html><head><title>Bench</title></head><body><div id=hello>Hello RF</div></body></html>"#;

/// Loads every page instantly
struct InstantEngine {
    listener: Option<Arc<dyn EngineListener>>,
}

impl EngineAdapter for InstantEngine {
    fn install_done_signal(&mut self, _message_name: &str) -> Result<()> {
        Ok(())
    }

    fn register_listener(&mut self, listener: Arc<dyn EngineListener>) {
        self.listener = Some(listener);
    }

    fn unregister_listener(&mut self) {
        self.listener = None;
    }

    fn navigate(&mut self, _request: &NavigationRequest) -> Result<()> {
        if let Some(listener) = &self.listener {
            listener.on_injected_message(DONE_MESSAGE, PAGE);
            listener.on_navigation_finished();
        }
        Ok(())
    }

    fn evaluate(&mut self, script: &str, reply: EvalCallback) {
        let value = if script == CAPTURE_DOCUMENT_SCRIPT {
            ScriptValue::String(PAGE.to_string())
        } else {
            ScriptValue::Bool(true)
        };
        reply(Ok(value));
    }
}

fn bench_render_navigation(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let dispatcher = rt
        .block_on(async { Dispatcher::new(InstantEngine { listener: None }, RendererConfig::default()) })
        .expect("dispatcher");

    c.bench_function("render_navigation", |b| {
        b.iter(|| {
            let out = rt.block_on(dispatcher.render(RenderRequest::navigate("http://bench/"), None));
            assert!(out.error.is_none());
        })
    });
}

fn bench_execute_script(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let dispatcher = rt
        .block_on(async { Dispatcher::new(InstantEngine { listener: None }, RendererConfig::default()) })
        .expect("dispatcher");

    c.bench_function("execute_script", |b| {
        b.iter(|| {
            let out = rt.block_on(dispatcher.execute_script("1 + 1", false, None));
            assert!(out.error.is_none());
        })
    });
}

criterion_group!(benches, bench_render_navigation, bench_execute_script);
criterion_main!(benches);
