//! Options passed to the transport for sync up / down.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How incoming changes are merged with local changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeMode {
    /// Incoming values replace local ones.
    Overwrite,
    /// Records changed on the other side are left alone.
    LeaveIfChanged,
}

/// Options for a single sync up or down.
///
/// The JSON form uses the remote SDK keys `mergeMode`, `fieldlist` and
/// `fieldlistforupdate`, so persisted options stay readable by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Merge mode.
    #[serde(rename = "mergeMode", default, skip_serializing_if = "Option::is_none")]
    pub merge_mode: Option<MergeMode>,
    /// Fields sent on create (sync up only).
    #[serde(rename = "fieldlist", default, skip_serializing_if = "Option::is_none")]
    pub field_list: Option<Vec<String>>,
    /// Fields sent on update (sync up only).
    #[serde(
        rename = "fieldlistforupdate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub field_list_for_update: Option<Vec<String>>,
}

impl SyncOptions {
    /// Options for a sync up.
    ///
    /// Fails when `field_list` is empty: the remote side would receive
    /// records with nothing to write.
    pub fn for_sync_up(
        field_list: Vec<String>,
        field_list_for_update: Vec<String>,
        merge_mode: MergeMode,
    ) -> SyncResult<Self> {
        if field_list.is_empty() {
            return Err(SyncError::InvalidOptions(
                "sync up requires at least one field".into(),
            ));
        }
        Ok(Self {
            merge_mode: Some(merge_mode),
            field_list: Some(field_list),
            field_list_for_update: Some(field_list_for_update),
        })
    }

    /// Options for a sync down.
    pub fn for_sync_down(merge_mode: MergeMode) -> Self {
        Self {
            merge_mode: Some(merge_mode),
            field_list: None,
            field_list_for_update: None,
        }
    }

    /// Merge mode, defaulting to overwrite.
    pub fn merge_mode(&self) -> MergeMode {
        self.merge_mode.unwrap_or(MergeMode::Overwrite)
    }

    /// Fields to send for a record, picking the update list for records
    /// that already exist remotely.
    pub fn fields_for(&self, exists_remotely: bool) -> &[String] {
        let list = if exists_remotely {
            self.field_list_for_update
                .as_ref()
                .or(self.field_list.as_ref())
        } else {
            self.field_list.as_ref()
        };
        list.map(Vec::as_slice).unwrap_or(&[])
    }

    /// JSON representation.
    pub fn to_json(&self) -> SyncResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses the JSON representation.
    pub fn from_json(value: &Value) -> SyncResult<Self> {
        Ok(Self::deserialize(value)?)
    }
}
