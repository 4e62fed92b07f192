use research_stream::channel::{SocketOptions, SocketStartExt};
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
    let printer = tokio::spawn(async move {
        let mut shown = 0;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let text = &snapshot.display.displayed_text;
            if text.len() > shown {
                print!("{}", &text[shown..]);
                shown = text.len();
            }
            if let Some(error) = &snapshot.state.error {
                eprintln!("\nresearch error: {error}");
                break;
            }
        }
    });

    let ticket = session
        .start(
            "Validate a mobile car-wash subscription for apartment complexes",
            BackendKind::Socket,
            StartOptions::default().socket_options(
                SocketOptions::default()
                    .research_type("market_analysis")
                    .depth("detailed"),
            ),
        )
        .await?;

    let report = ticket.wait().await;
    drop(session);
    let _ = printer.await;
    println!();

    let report = report?;
    println!("{} characters", report.chars().count());
    Ok(())
}
