//! Messages exchanged between a datastore and the patch relay.
//!
//! Every message is a JSON object with `msgId`, `msgType`, an optional
//! `parentId` naming the request a reply answers, and a `content` payload.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::{MessageId, PatchId, StoreId};
use crate::transaction::Transaction;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub msg_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "msgType",
    content = "content",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum MessageBody {
    StoreidRequest {},
    StoreidReply { store_id: StoreId },
    PatchBroadcast { patch: Transaction },
    PatchHistoryRequest {},
    PatchHistoryReply { patch_history: Vec<Transaction> },
    FetchPatchRequest { patch_ids: Vec<PatchId> },
    FetchPatchReply { patches: Vec<Transaction> },
}

impl MessageBody {
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::StoreidRequest {} => "storeid-request",
            Self::StoreidReply { .. } => "storeid-reply",
            Self::PatchBroadcast { .. } => "patch-broadcast",
            Self::PatchHistoryRequest {} => "patch-history-request",
            Self::PatchHistoryReply { .. } => "patch-history-reply",
            Self::FetchPatchRequest { .. } => "fetch-patch-request",
            Self::FetchPatchReply { .. } => "fetch-patch-reply",
        }
    }
}

impl Message {
    pub fn new(body: MessageBody) -> Self {
        Self {
            msg_id: MessageId::new(),
            parent_id: None,
            body,
        }
    }

    /// A reply to `self`, carrying `self.msg_id` as its parent.
    pub fn reply(&self, body: MessageBody) -> Self {
        Self {
            msg_id: MessageId::new(),
            parent_id: Some(self.msg_id),
            body,
        }
    }

    pub fn msg_type(&self) -> &'static str {
        self.body.msg_type()
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string(self).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, CoreError> {
        serde_json::from_str(text).map_err(|e| CoreError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_wire_shape() {
        let msg = Message::new(MessageBody::StoreidRequest {});
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["msgType"], json!("storeid-request"));
        assert_eq!(value["content"], json!({}));
        assert!(value.get("parentId").is_none());
        assert_eq!(value["msgId"], json!(msg.msg_id.to_string()));
    }

    #[test]
    fn reply_carries_parent_and_camel_case_content() {
        let request = Message::new(MessageBody::StoreidRequest {});
        let reply = request.reply(MessageBody::StoreidReply {
            store_id: StoreId::new(4),
        });
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["msgType"], json!("storeid-reply"));
        assert_eq!(value["parentId"], json!(request.msg_id.to_string()));
        assert_eq!(value["content"], json!({"storeId": 4}));

        let back = Message::from_json(&reply.to_json().unwrap()).unwrap();
        assert_eq!(back, reply);
    }

    #[test]
    fn patch_messages_roundtrip() {
        let tx = Transaction::new(StoreId::new(2), 5);
        let messages = [
            Message::new(MessageBody::PatchBroadcast { patch: tx.clone() }),
            Message::new(MessageBody::PatchHistoryReply {
                patch_history: vec![tx.clone()],
            }),
            Message::new(MessageBody::FetchPatchRequest {
                patch_ids: vec![tx.patch_id],
            }),
        ];
        for msg in messages {
            let back = Message::from_json(&msg.to_json().unwrap()).unwrap();
            assert_eq!(back, msg);
        }

        let value = serde_json::to_value(Message::new(MessageBody::FetchPatchRequest {
            patch_ids: vec![tx.patch_id],
        }))
        .unwrap();
        assert_eq!(value["content"]["patchIds"][0], json!(tx.patch_id.to_string()));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let text = r#"{"msgId":"0190a0b0-0000-7000-8000-000000000000","msgType":"bogus","content":{}}"#;
        assert!(Message::from_json(text).is_err());
    }
}
