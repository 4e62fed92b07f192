use research_stream::channel::{EventStreamOptions, EventStreamStartExt};
use research_stream::observability::init_observability;
use research_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ResearchError> {
    init_observability();

    let engine = Engine::builder()
        .config(EngineConfig::from_env()?)
        .with_default_channels()
        .build()?;
    let mut session = engine.session();
    let mut updates = session.subscribe();

    let ticket = session
        .start(
            "Who are the main competitors for a B2B invoice-factoring app?",
            BackendKind::EventStream,
            StartOptions::default().event_stream_options(
                EventStreamOptions::default()
                    .enable_deep_thinking(true)
                    .max_search_results(5),
            ),
        )
        .await?;

    // Accept the first research plan the backend proposes.
    let mut answered = false;
    while !answered && updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.phase().is_terminal() {
            break;
        }
        if let Some(request) = &snapshot.state.awaiting_feedback {
            eprintln!("{}", request.prompt);
            let choice = request
                .options
                .first()
                .map(|option| format!("[{}]", option.value.to_uppercase()))
                .unwrap_or_else(|| "[ACCEPTED]".to_string());
            session.send_feedback(choice).await;
            answered = true;
        }
    }

    let report = ticket.wait().await?;
    println!("{report}");
    for citation in session.snapshot().state.citations {
        println!("- {} <{}>", citation.title, citation.url);
    }
    Ok(())
}
