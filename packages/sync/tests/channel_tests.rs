//! Sender, transport and replica working together

use std::sync::Arc;
use std::time::Duration;

use pagecraft_model::{Block, Section};
use pagecraft_sync::{
    decode, diff_sections, encode, ChannelTransport, InboundEvent, PreviewMessage, PreviewReplica, PreviewSender,
    SendStatus,
};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

fn sections(list: Vec<Section>) -> Vec<Arc<Section>> {
    let mut sections: Vec<Arc<Section>> = list.into_iter().map(Arc::new).collect();
    Section::renumber(&mut sections);
    sections
}

fn drain(inbox: &mut UnboundedReceiver<String>, replica: &mut PreviewReplica) -> usize {
    let mut applied = 0;
    while let Ok(payload) = inbox.try_recv() {
        replica.apply(&decode(&payload).unwrap());
        applied += 1;
    }
    applied
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_surface_gets_one_retry() {
    let (transport, mut inbox) = ChannelTransport::new();
    let transport = Arc::new(transport);
    let mut sender = PreviewSender::new(transport.clone(), Duration::from_millis(100));
    sender.handle_message(PreviewMessage::PreviewReady { sections: vec![] });

    let message = PreviewMessage::SectionDelete {
        section_id: "a".to_string(),
    };
    assert_eq!(sender.send(message.clone()), SendStatus::RetryScheduled);
    assert!(inbox.try_recv().is_err());

    transport.set_attached(true);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(decode(&inbox.try_recv().unwrap()).unwrap(), message);
    assert!(inbox.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_second_failure() {
    let (transport, mut inbox) = ChannelTransport::new();
    let mut sender = PreviewSender::new(Arc::new(transport), Duration::from_millis(100));
    sender.handle_message(PreviewMessage::PreviewReady { sections: vec![] });

    sender.send(PreviewMessage::SectionDelete {
        section_id: "a".to_string(),
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_handshake_flushes_queue_to_replica() {
    let (transport, mut inbox) = ChannelTransport::new();
    transport.set_attached(true);
    let mut sender = PreviewSender::new(Arc::new(transport), Duration::from_millis(100));

    let authoritative = sections(vec![
        Section::new("a", "hero").with_blocks([Block::new("t", "text")]),
        Section::new("b", "footer"),
    ]);
    sender.send(PreviewMessage::SectionsReorder {
        sections: authoritative.clone(),
    });
    sender.send(PreviewMessage::SectionDelete {
        section_id: "b".to_string(),
    });
    assert_eq!(sender.queued(), 2);

    let mut replica = PreviewReplica::new();
    let event = sender
        .handle_inbound(&encode(&replica.ready_message()).unwrap())
        .unwrap();
    assert!(matches!(event, InboundEvent::Ready { flushed: 2, .. }));

    assert_eq!(drain(&mut inbox, &mut replica), 2);
    assert_eq!(replica.sections(), &authoritative[..1]);
}

#[test]
fn test_duplicated_and_reordered_updates_converge() {
    let old = sections(vec![
        Section::new("a", "hero").with_blocks([
            Block::new("g", "group").with_children([Block::new("x", "text")]),
            Block::new("t", "text"),
        ]),
        Section::new("b", "footer"),
        Section::new("c", "footer"),
    ]);
    let new = sections(vec![
        Section::new("a", "hero")
            .with_settings(json!({ "title": "Sale" }).as_object().cloned().unwrap_or_default())
            .with_blocks([Block::new("t", "text")]),
        Section::new("b", "footer").with_blocks([
            Block::new("g", "group").with_children([Block::new("x", "text")]),
        ]),
        Section::new("c", "footer"),
    ]);

    let messages = diff_sections(&old, &new);
    assert!(messages
        .iter()
        .all(|m| matches!(m, PreviewMessage::SectionUpdate { .. })));

    let mut in_order = PreviewReplica::new();
    in_order.apply(&PreviewMessage::SectionsReorder { sections: old.clone() });
    let mut shuffled = in_order.clone();

    for message in &messages {
        in_order.apply(message);
    }
    for message in messages.iter().rev().chain(messages.iter()) {
        shuffled.apply(message);
    }

    assert_eq!(in_order.sections(), new.as_slice());
    assert_eq!(shuffled, in_order);
}

#[test]
fn test_unknown_messages_are_ignored() {
    let (transport, _inbox) = ChannelTransport::new();
    let mut sender = PreviewSender::new(Arc::new(transport), Duration::from_millis(100));

    let event = sender
        .handle_inbound(r#"{ "type": "SCROLL_CHANGED", "offset": 120 }"#)
        .unwrap();
    assert_eq!(event, InboundEvent::Ignored);
    assert!(!sender.is_ready());

    let mut replica = PreviewReplica::new();
    assert!(!replica.apply(&decode(r#"{ "type": "SOMETHING_NEW" }"#).unwrap()));
}
