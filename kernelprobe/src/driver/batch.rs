//! Output collected for one execution request.

use std::slice;

use crate::channel::{ContentKind, Message, MessageKind};

/// One collected notification and how it was classified.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputItem {
    pub kind: MessageKind,
    pub message: Message,
}

impl OutputItem {
    /// Plain-text rendering of the underlying message.
    pub fn text(&self) -> Option<String> {
        self.message.text()
    }

    /// Message type tag.
    pub fn msg_type(&self) -> &str {
        self.message.msg_type()
    }

    fn is_content(&self, content: ContentKind) -> bool {
        self.kind == MessageKind::Content(content)
    }
}

/// Ordered, read-only output of one request, in arrival order.
///
/// Status and echo notifications are never part of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputBatch {
    items: Vec<OutputItem>,
}

impl OutputBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, OutputItem> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&OutputItem> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&OutputItem> {
        self.items.first()
    }

    /// `execute_result` and `display_data` items.
    pub fn results(&self) -> impl Iterator<Item = &OutputItem> {
        self.iter().filter(|item| item.is_content(ContentKind::Result))
    }

    pub fn errors(&self) -> impl Iterator<Item = &OutputItem> {
        self.iter().filter(|item| item.is_content(ContentKind::Error))
    }

    pub fn streams(&self) -> impl Iterator<Item = &OutputItem> {
        self.iter().filter(|item| item.is_content(ContentKind::Stream))
    }

    /// Items whose type the classifier did not recognize.
    pub fn unrecognized(&self) -> impl Iterator<Item = &OutputItem> {
        self.iter().filter(|item| item.kind == MessageKind::Unknown)
    }
}

impl<'a> IntoIterator for &'a OutputBatch {
    type Item = &'a OutputItem;
    type IntoIter = slice::Iter<'a, OutputItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accumulates a batch; `finish` consumes it, so a batch is sealed once.
#[derive(Debug, Default)]
pub(crate) struct BatchBuilder {
    items: Vec<OutputItem>,
}

impl BatchBuilder {
    pub(crate) fn push(&mut self, kind: MessageKind, message: Message) {
        self.items.push(OutputItem { kind, message });
    }

    pub(crate) fn finish(self) -> OutputBatch {
        OutputBatch { items: self.items }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::channel::{Channel, Header, classify};

    fn notification(msg_type: &str, content: serde_json::Value) -> Message {
        Message {
            channel: Channel::Notification,
            header: Header::new("m", "s", msg_type),
            parent_header: None,
            metadata: json!({}),
            content,
            sequence: 0,
        }
    }

    fn push(builder: &mut BatchBuilder, message: Message) {
        builder.push(classify(&message), message);
    }

    #[test]
    fn test_batch_keeps_arrival_order_and_filters() {
        let mut builder = BatchBuilder::default();
        push(
            &mut builder,
            notification("stream", json!({"name": "stdout", "text": "loading"})),
        );
        push(
            &mut builder,
            notification("display_data", json!({"data": {"text/plain": "2"}})),
        );
        push(
            &mut builder,
            notification("error", json!({"ename": "ParseError", "evalue": "near end"})),
        );
        push(&mut builder, notification("clear_output", json!({})));
        let batch = builder.finish();

        let types: Vec<_> = batch.iter().map(OutputItem::msg_type).collect();
        assert_eq!(types, ["stream", "display_data", "error", "clear_output"]);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch.results().count(), 1);
        assert_eq!(batch.first().and_then(OutputItem::text).as_deref(), Some("loading"));
        assert_eq!(
            batch.errors().next().and_then(OutputItem::text).as_deref(),
            Some("ParseError: near end")
        );
        assert_eq!(batch.streams().count(), 1);
        assert_eq!(batch.unrecognized().next().map(OutputItem::msg_type), Some("clear_output"));
    }

    #[test]
    fn test_empty_batch() {
        let batch = BatchBuilder::default().finish();
        assert!(batch.is_empty());
        assert!(batch.get(0).is_none());
        assert_eq!((&batch).into_iter().count(), 0);
    }
}
