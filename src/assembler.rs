use serde::{Deserialize, Serialize};

use crate::{processor::ResultSet, worker::ScrapedItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalReport {
    pub most_popular_item: Option<ScrapedItem>,
    /// Successful outcomes only; failed URLs are not counted.
    pub total_items_analyzed: usize,
    pub max_buyer_count: u64,
}

impl FinalReport {
    /// The report of a job in which nothing succeeded.
    pub fn empty() -> Self {
        Self {
            most_popular_item: None,
            total_items_analyzed: 0,
            max_buyer_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.most_popular_item.is_none()
    }
}

/// Reduces all result sets of a job to the item with the highest buyer
/// count.
///
/// Result sets may arrive in any order; they are walked in chunk-index order
/// and then in outcome order, and the first item seen with the maximum count
/// wins ties.
pub fn assemble<'a, I>(result_sets: I) -> FinalReport
where
    I: IntoIterator<Item = &'a ResultSet>,
{
    let mut ordered: Vec<&ResultSet> = result_sets.into_iter().collect();
    ordered.sort_by_key(|result_set| result_set.chunk_index());
    if ordered
        .windows(2)
        .any(|pair| pair[0].chunk_index() == pair[1].chunk_index())
    {
        tracing::warn!("duplicate chunk indices among result sets, keeping delivery order");
    }

    let mut best: Option<&ScrapedItem> = None;
    let mut total_items_analyzed = 0;
    for item in ordered.iter().flat_map(|result_set| result_set.successes()) {
        total_items_analyzed += 1;
        if best.map_or(true, |current| item.buyer_count > current.buyer_count) {
            best = Some(item);
        }
    }

    let report = FinalReport {
        most_popular_item: best.cloned(),
        total_items_analyzed,
        max_buyer_count: best.map_or(0, |item| item.buyer_count),
    };
    match &report.most_popular_item {
        Some(item) => tracing::info!(
            result_sets = ordered.len(),
            total_items_analyzed,
            title = item.title.as_str(),
            buyer_count = item.buyer_count,
            "most popular item selected"
        ),
        None => tracing::info!(
            result_sets = ordered.len(),
            "no successful items, nothing to rank"
        ),
    }
    report
}
