use crate::util::{mask_phone, truncate_with_ellipsis};
use crate::webhook::MessageBatch;
use async_trait::async_trait;

/// Downstream consumer of accepted deliveries.
///
/// Called once per non-empty batch. An error turns the webhook answer into a
/// 500 so the provider redelivers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, batch: MessageBatch) -> anyhow::Result<()>;
}

/// Logs each message and accepts it. Default handler for `wa-edge serve`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, batch: MessageBatch) -> anyhow::Result<()> {
        for message in &batch.messages {
            tracing::info!(
                correlation_id = %batch.correlation_id,
                message_id = %message.id,
                from = %mask_phone(&message.from),
                kind = %message.kind,
                locale = batch.locale_for(message).unwrap_or("unknown"),
                "WhatsApp message: {}",
                truncate_with_ellipsis(message.text.as_deref().unwrap_or(""), 50)
            );
        }
        Ok(())
    }
}
