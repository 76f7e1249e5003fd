//! Overlay merge engine.
//!
//! Recently uploaded records live in a separate overlay until the listing
//! endpoint catches up. These functions fold the overlay into cached pages
//! at read time; nothing here touches the store.

use std::collections::HashSet;

use metrics::counter;

use crate::cache::{InfinitePages, ListingFilter};
use crate::domain::listing::{collect_ids, total_pages};
use crate::domain::{ImageRecord, ListingPage, Orientation};

const METRIC_OVERLAY_MERGED: &str = "pictura_listing_overlay_merged_total";

/// An absent or empty filter value always matches.
pub fn matches_filters(
    record: &ImageRecord,
    tag: Option<&str>,
    orientation: Option<Orientation>,
) -> bool {
    let tag_ok = match tag {
        None | Some("") => true,
        Some(tag) => record.tags.iter().any(|candidate| candidate == tag),
    };
    let orientation_ok = orientation.is_none_or(|wanted| record.orientation == wanted);
    tag_ok && orientation_ok
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPage {
    pub images: Vec<ImageRecord>,
    /// Additions whose id is not already in `existing`, regardless of truncation.
    pub added_count: usize,
}

/// Additions first, then existing records; unidentified and repeated ids are
/// dropped and the result stops at `limit`.
pub fn merge_first_page(
    existing: &[ImageRecord],
    additions: &[ImageRecord],
    limit: usize,
) -> MergedPage {
    let mut seen = HashSet::new();
    let mut images = Vec::with_capacity(limit.min(existing.len() + additions.len()));

    for record in additions.iter().chain(existing) {
        if images.len() >= limit {
            break;
        }
        if !record.has_id() || !seen.insert(record.id.as_str()) {
            continue;
        }
        images.push(record.clone());
    }

    let existing_ids: HashSet<&str> = existing.iter().map(|record| record.id.as_str()).collect();
    let added_count = additions
        .iter()
        .filter(|record| record.has_id() && !existing_ids.contains(record.id.as_str()))
        .count();

    MergedPage {
        images,
        added_count,
    }
}

/// Overlay records matching `filter`, in overlay order.
pub fn overlay_matches(overlay: &[ImageRecord], filter: &ListingFilter) -> Vec<ImageRecord> {
    overlay
        .iter()
        .filter(|record| matches_filters(record, filter.tag(), filter.orientation))
        .cloned()
        .collect()
}

/// Instant first-page content built from the overlay alone.
pub fn placeholder_page(overlay: &[ImageRecord], filter: &ListingFilter) -> Option<ListingPage> {
    let mut images = overlay_matches(overlay, filter);
    images.truncate(filter.limit as usize);
    if images.is_empty() {
        return None;
    }
    Some(ListingPage {
        total: images.len() as u64,
        images,
        page: 1,
        total_pages: 1,
    })
}

/// Read-time view of a paged listing entry. Only page 1 absorbs the overlay.
pub fn project_page(
    fetched: &ListingPage,
    page_number: u32,
    overlay: &[ImageRecord],
    filter: &ListingFilter,
) -> ListingPage {
    if page_number != 1 {
        return fetched.clone();
    }
    let candidates = overlay_matches(overlay, filter);
    if candidates.is_empty() {
        return fetched.clone();
    }

    let present = collect_ids([fetched]);
    let missing = count_missing(&candidates, &present);
    let total = adjusted_total(fetched.total, missing);
    let merged = merge_first_page(&fetched.images, &candidates, filter.limit as usize);
    record_merge(merged.added_count);

    ListingPage {
        images: merged.images,
        page: fetched.page,
        total,
        total_pages: total_pages(total, filter.limit),
    }
}

/// Read-time view of an infinite listing entry.
///
/// Missing overlay records are counted against ids across every loaded page,
/// only the first page's records are replaced, and every page reports the
/// adjusted totals.
pub fn project_pages(
    fetched: &InfinitePages,
    overlay: &[ImageRecord],
    filter: &ListingFilter,
) -> InfinitePages {
    let Some(first) = fetched.pages.first() else {
        return fetched.clone();
    };
    let candidates = overlay_matches(overlay, filter);
    if candidates.is_empty() {
        return fetched.clone();
    }

    let present = collect_ids(&fetched.pages);
    let missing = count_missing(&candidates, &present);
    let total = adjusted_total(first.total, missing);
    let pages_total = total_pages(total, filter.limit);
    let merged = merge_first_page(&first.images, &candidates, filter.limit as usize);
    record_merge(merged.added_count);

    let mut first_images = Some(merged.images);
    let pages = fetched
        .pages
        .iter()
        .map(|page| ListingPage {
            images: first_images.take().unwrap_or_else(|| page.images.clone()),
            page: page.page,
            total,
            total_pages: pages_total,
        })
        .collect();

    InfinitePages {
        pages,
        page_params: fetched.page_params.clone(),
    }
}

fn count_missing(candidates: &[ImageRecord], present: &HashSet<&str>) -> u64 {
    candidates
        .iter()
        .filter(|record| record.has_id() && !present.contains(record.id.as_str()))
        .count() as u64
}

fn adjusted_total(fetched_total: u64, missing: u64) -> u64 {
    fetched_total.max(fetched_total.saturating_add(missing))
}

fn record_merge(added: usize) {
    if added > 0 {
        counter!(METRIC_OVERLAY_MERGED).increment(added as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, tags: &[&str]) -> ImageRecord {
        ImageRecord::new(
            id,
            Orientation::Landscape,
            tags.iter().map(|tag| tag.to_string()).collect(),
        )
    }

    fn ids(records: &[ImageRecord]) -> Vec<&str> {
        records.iter().map(|record| record.id.as_str()).collect()
    }

    fn page(ids: &[&str], page: u32, total: u64, total_pages: u32) -> ListingPage {
        ListingPage {
            images: ids.iter().map(|id| record(id, &[])).collect(),
            page,
            total,
            total_pages,
        }
    }

    #[test]
    fn filters_match_when_absent_or_empty() {
        let image = ImageRecord::new("a", Orientation::Portrait, vec!["cat".into()]);
        assert!(matches_filters(&image, None, None));
        assert!(matches_filters(&image, Some(""), None));
        assert!(matches_filters(&image, Some("cat"), Some(Orientation::Portrait)));
        assert!(!matches_filters(&image, Some("dog"), None));
        assert!(!matches_filters(&image, Some("cat"), Some(Orientation::Square)));
    }

    #[test]
    fn disjoint_inputs_keep_additions_first() {
        let existing = [record("c", &[]), record("d", &[])];
        let additions = [record("a", &[]), record("b", &[])];
        let merged = merge_first_page(&existing, &additions, 10);
        assert_eq!(ids(&merged.images), vec!["a", "b", "c", "d"]);
        assert_eq!(merged.added_count, 2);
    }

    #[test]
    fn overlapping_id_takes_addition_copy() {
        let existing = [ImageRecord::new("x", Orientation::Square, Vec::new())];
        let additions = [ImageRecord::new("x", Orientation::Portrait, Vec::new())];
        let merged = merge_first_page(&existing, &additions, 10);
        assert_eq!(merged.images.len(), 1);
        assert_eq!(merged.images[0].orientation, Orientation::Portrait);
        assert_eq!(merged.added_count, 0);
    }

    #[test]
    fn merge_truncates_but_counts_true_novelty() {
        let existing = [record("c", &[]), record("d", &[])];
        let additions = [record("a", &[]), record("b", &[]), record("e", &[])];
        let merged = merge_first_page(&existing, &additions, 2);
        assert_eq!(ids(&merged.images), vec!["a", "b"]);
        assert_eq!(merged.added_count, 3);
    }

    #[test]
    fn unidentified_records_are_dropped() {
        let existing = [record("", &[]), record("c", &[])];
        let additions = [record("", &[])];
        let merged = merge_first_page(&existing, &additions, 10);
        assert_eq!(ids(&merged.images), vec!["c"]);
        assert_eq!(merged.added_count, 0);
    }

    #[test]
    fn zero_limit_yields_empty_page() {
        let merged = merge_first_page(&[record("a", &[])], &[record("b", &[])], 0);
        assert!(merged.images.is_empty());
        assert_eq!(merged.added_count, 1);
    }

    #[test]
    fn placeholder_only_when_overlay_matches() {
        let overlay = [record("a", &["x"]), record("b", &["y"])];
        let filter = ListingFilter::new(24, Some("x".into()), None);
        let placeholder = placeholder_page(&overlay, &filter).expect("one match");
        assert_eq!(ids(&placeholder.images), vec!["a"]);
        assert_eq!((placeholder.page, placeholder.total, placeholder.total_pages), (1, 1, 1));

        let filter = ListingFilter::new(24, Some("z".into()), None);
        assert!(placeholder_page(&overlay, &filter).is_none());
    }

    #[test]
    fn placeholder_is_truncated_to_limit() {
        let overlay = [record("a", &[]), record("b", &[]), record("c", &[])];
        let filter = ListingFilter::new(2, None, None);
        let placeholder = placeholder_page(&overlay, &filter).expect("matches");
        assert_eq!(placeholder.total, 2);
    }

    #[test]
    fn first_page_absorbs_matching_overlay() {
        let overlay = [record("a", &["x"]), record("b", &["y"])];
        let fetched = ListingPage {
            images: vec![record("c", &["x"]), record("d", &["x"])],
            page: 1,
            total: 2,
            total_pages: 1,
        };
        let filter = ListingFilter::new(24, Some("x".into()), None);

        let projected = project_page(&fetched, 1, &overlay, &filter);
        assert_eq!(ids(&projected.images), vec!["a", "c", "d"]);
        assert_eq!(projected.total, 3);
        assert_eq!(projected.total_pages, 1);
    }

    #[test]
    fn later_pages_are_untouched() {
        let overlay = [record("a", &[])];
        let fetched = page(&["c"], 2, 30, 2);
        let filter = ListingFilter::new(24, None, None);
        assert_eq!(project_page(&fetched, 2, &overlay, &filter), fetched);
    }

    #[test]
    fn present_overlay_record_does_not_raise_total() {
        let overlay = [record("c", &[])];
        let fetched = page(&["c", "d"], 1, 2, 1);
        let filter = ListingFilter::new(24, None, None);
        let projected = project_page(&fetched, 1, &overlay, &filter);
        assert_eq!(projected.total, 2);
        assert_eq!(ids(&projected.images), vec!["c", "d"]);
    }

    #[test]
    fn total_counts_every_missing_match_even_past_limit() {
        let overlay = [record("a", &[]), record("b", &[]), record("e", &[])];
        let fetched = page(&["c", "d"], 1, 2, 1);
        let filter = ListingFilter::new(2, None, None);
        let projected = project_page(&fetched, 1, &overlay, &filter);
        assert_eq!(ids(&projected.images), vec!["a", "b"]);
        assert_eq!(projected.total, 5);
        assert_eq!(projected.total_pages, 3);
    }

    #[test]
    fn infinite_projection_checks_ids_across_pages() {
        let overlay = [record("a", &[]), record("z", &[])];
        let fetched = InfinitePages {
            pages: vec![page(&["c", "d"], 1, 4, 2), page(&["z", "f"], 2, 4, 2)],
            page_params: vec![1, 2],
        };
        let filter = ListingFilter::new(2, None, None);

        let projected = project_pages(&fetched, &overlay, &filter);
        assert_eq!(ids(&projected.pages[0].images), vec!["a", "z"]);
        assert_eq!(ids(&projected.pages[1].images), vec!["z", "f"]);
        for page in &projected.pages {
            assert_eq!(page.total, 5);
            assert_eq!(page.total_pages, 3);
        }
        assert_eq!(projected.page_params, vec![1, 2]);
    }

    #[test]
    fn infinite_projection_without_pages_is_identity() {
        let fetched = InfinitePages {
            pages: Vec::new(),
            page_params: Vec::new(),
        };
        let filter = ListingFilter::new(24, None, None);
        assert_eq!(project_pages(&fetched, &[record("a", &[])], &filter), fetched);
    }
}
