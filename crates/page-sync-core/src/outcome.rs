//! What a synchronizer did with one entry.

use crate::remote::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    Created,
    Updated,
    /// Nothing was written
    Unchanged,
    /// The cached page could not be modified and a replacement was created
    Recreated,
}

impl PageAction {
    pub fn label(self) -> &'static str {
        match self {
            PageAction::Created => "created",
            PageAction::Updated => "updated",
            PageAction::Unchanged => "unchanged",
            PageAction::Recreated => "recreated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncedPage {
    pub page: Page,
    pub action: PageAction,
}

impl SyncedPage {
    pub fn new(page: Page, action: PageAction) -> Self {
        Self { page, action }
    }
}
