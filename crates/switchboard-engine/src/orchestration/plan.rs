use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub description: String,
    pub complete: bool,
}

impl PlanItem {
    pub fn pending(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            complete: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid plan item index: {0}")]
pub struct InvalidIndex(pub String);

/// Ordered checklist kept by the orchestration controller.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    items: Vec<PlanItem>,
}

impl Plan {
    /// Replace the whole plan with fresh, incomplete items.
    pub fn set<S: Into<String>>(&mut self, items: impl IntoIterator<Item = S>) {
        self.items = items.into_iter().map(PlanItem::pending).collect();
    }

    /// Mark one item complete. Out-of-range indices leave the plan untouched.
    pub fn check(&mut self, index: i64) -> Result<(), InvalidIndex> {
        let item = usize::try_from(index)
            .ok()
            .and_then(|i| self.items.get_mut(i))
            .ok_or_else(|| InvalidIndex(index.to_string()))?;
        item.complete = true;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.items.iter().filter(|i| i.complete).count()
    }
}
