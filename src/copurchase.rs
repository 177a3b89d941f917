//! Co-purchase aggregation over paid order history.
//!
//! Powers "customers also bought" and cart complements. No vectors involved:
//! the signal is how often other products appear in the same paid orders as
//! the reference products.

use std::collections::{HashMap, HashSet};

/// One line of a paid order, as fetched by the catalog store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    /// Order the line belongs to.
    pub order_id: i64,
    /// Product the line references.
    pub product_id: i64,
}

/// A co-purchased product and the number of order lines it appeared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoPurchase {
    /// Product found alongside the reference set.
    pub product_id: i64,
    /// Order lines counted for it across qualifying orders.
    pub frequency: i64,
}

/// Counts co-purchases of `reference_ids` over the given order lines.
///
/// An order qualifies when it contains at least one reference product; every
/// line of a qualifying order whose product is not itself in the reference
/// set contributes one to that product's frequency. Reference ids never
/// appear in the output, even when two reference products co-occur. Ordering
/// is frequency descending with ties broken by product id, so identical
/// input always produces identical output.
pub fn co_purchased(
    lines: &[OrderLine],
    reference_ids: &HashSet<i64>,
    limit: usize,
) -> Vec<CoPurchase> {
    if reference_ids.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut qualifying: HashSet<i64> = HashSet::new();
    for line in lines {
        if reference_ids.contains(&line.product_id) {
            qualifying.insert(line.order_id);
        }
    }

    let mut counts: HashMap<i64, i64> = HashMap::new();
    for line in lines {
        if qualifying.contains(&line.order_id) && !reference_ids.contains(&line.product_id) {
            *counts.entry(line.product_id).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<CoPurchase> = counts
        .into_iter()
        .map(|(product_id, frequency)| CoPurchase {
            product_id,
            frequency,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn line(order_id: i64, product_id: i64) -> OrderLine {
        OrderLine {
            order_id,
            product_id,
        }
    }

    fn refs(ids: &[i64]) -> HashSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn counts_other_products_in_qualifying_orders() {
        let lines = vec![
            line(1, 10),
            line(1, 20),
            line(1, 30),
            line(2, 10),
            line(2, 30),
            line(3, 20),
            line(3, 40),
        ];
        let result = co_purchased(&lines, &refs(&[10]), 5);
        assert_eq!(
            result,
            vec![
                CoPurchase {
                    product_id: 30,
                    frequency: 2
                },
                CoPurchase {
                    product_id: 20,
                    frequency: 1
                },
            ]
        );
    }

    #[test]
    fn reference_ids_never_appear_in_output() {
        // Products 10 and 20 co-occur in order 1; neither may be suggested.
        let lines = vec![line(1, 10), line(1, 20), line(1, 30)];
        let result = co_purchased(&lines, &refs(&[10, 20]), 5);
        assert_eq!(
            result,
            vec![CoPurchase {
                product_id: 30,
                frequency: 1
            }]
        );
    }

    #[test]
    fn empty_reference_set_yields_empty() {
        let lines = vec![line(1, 10), line(1, 20)];
        assert!(co_purchased(&lines, &refs(&[]), 5).is_empty());
    }

    #[test]
    fn orders_without_references_do_not_count() {
        // Neither 5 nor 7 was ever bought alongside anything.
        let lines = vec![line(1, 10), line(1, 20), line(2, 5), line(3, 7)];
        assert!(co_purchased(&lines, &refs(&[5, 7]), 5).is_empty());
    }

    #[test]
    fn frequency_ties_break_by_product_id() {
        let lines = vec![line(1, 10), line(1, 40), line(2, 10), line(2, 20)];
        let result = co_purchased(&lines, &refs(&[10]), 5);
        assert_eq!(
            result,
            vec![
                CoPurchase {
                    product_id: 20,
                    frequency: 1
                },
                CoPurchase {
                    product_id: 40,
                    frequency: 1
                },
            ]
        );
    }

    #[test]
    fn limit_truncates_the_ranking() {
        let lines = vec![
            line(1, 10),
            line(1, 20),
            line(1, 30),
            line(2, 10),
            line(2, 20),
        ];
        let result = co_purchased(&lines, &refs(&[10]), 1);
        assert_eq!(
            result,
            vec![CoPurchase {
                product_id: 20,
                frequency: 2
            }]
        );
    }
}
