//! Embed a few sentences against an OpenAI-compatible endpoint.
//!
//! ```sh
//! OPENAI_API_KEY=... cargo run -p scriptorium-embed --example simple_embedding
//! ```

use scriptorium_embed::{EmbedConfig, EmbeddingProvider, OpenAiProvider, RetryPolicy, retry_async};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = EmbedConfig::default().with_batch_size(2);
    println!("Model: {}", config.model);
    println!("Endpoint: {}", config.endpoint());

    let provider = OpenAiProvider::new(config)?;
    println!("Dimension: {}", provider.embedding_dimension());

    let text = "Whale-ship was my Yale College and my Harvard.";
    let policy = RetryPolicy::default();
    let embedding = retry_async(&policy, "embed single text", || provider.embed_text(text))
        .await
        .map_err(|exhausted| exhausted.into_embed_error())?;
    println!("\n\"{text}\"");
    println!("  first 5 values: {:?}", &embedding[..5.min(embedding.len())]);

    let texts = vec![
        "Call me Ishmael.".to_string(),
        "It is a truth universally acknowledged.".to_string(),
        "Happy families are all alike.".to_string(),
    ];
    let result = provider.embed_texts(&texts).await?;
    println!("\nGenerated {} embeddings", result.len());
    for (text, embedding) in texts.iter().zip(result.embeddings.iter()) {
        println!("  \"{text}\": {:?}", &embedding[..3.min(embedding.len())]);
    }

    Ok(())
}
