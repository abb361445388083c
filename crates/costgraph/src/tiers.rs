//! progressive pricing tiers
//!
//! Many usage based prices are tiered: the first million requests cost more than the next nine
//! million and so on. [buckets] splits one usage total across such tiers.
use rust_decimal::Decimal;

/// Split `total` across the tiers delimited by `breakpoints`
///
/// Returns `breakpoints.len() + 1` quantities. Bucket 0 covers `[0, breakpoints[0])`, bucket `i`
/// covers `[breakpoints[i-1], breakpoints[i])` and the last bucket is unbounded.
///
/// Breakpoints must be strictly increasing, this is not checked.
///
/// ```
/// # use costgraph::tiers::buckets;
/// # use rust_decimal_macros::dec;
/// assert_eq!(
///     buckets(dec!(1500000), &[dec!(1000000), dec!(10000000)]),
///     vec![dec!(1000000), dec!(500000), dec!(0)],
/// );
/// ```
pub fn buckets(total: Decimal, breakpoints: &[Decimal]) -> Vec<Decimal> {
    let mut quantities = Vec::with_capacity(breakpoints.len() + 1);
    let mut remaining = total;
    let mut lower = Decimal::ZERO;

    for &upper in breakpoints {
        let quantity = remaining.min(upper - lower).max(Decimal::ZERO);
        quantities.push(quantity);
        remaining -= quantity;
        lower = upper;
    }

    quantities.push(remaining.max(Decimal::ZERO));
    quantities
}

/// Lower bound of every bucket produced by [buckets], used as `startUsageAmount` price filter
pub fn tier_starts(breakpoints: &[Decimal]) -> Vec<Decimal> {
    std::iter::once(Decimal::ZERO)
        .chain(breakpoints.iter().copied())
        .collect()
}

/// One non-empty tier of a bucketed total
#[derive(Debug, Clone, PartialEq)]
pub struct Tier<'a> {
    pub name: &'a str,
    pub start_usage_amount: Decimal,
    pub quantity: Decimal,
}

/// [buckets] paired with tier names and start amounts
///
/// The first tier is always returned so a resource with no usage still lists its price;
/// later tiers only when they received a quantity.
pub fn named_tiers<'a>(total: Decimal, breakpoints: &[Decimal], names: &[&'a str]) -> Vec<Tier<'a>> {
    buckets(total, breakpoints)
        .into_iter()
        .zip(tier_starts(breakpoints))
        .zip(names.iter())
        .enumerate()
        .filter(|(i, ((quantity, _), _))| *i == 0 || quantity > &Decimal::ZERO)
        .map(|(_, ((quantity, start_usage_amount), name))| Tier {
            name: *name,
            start_usage_amount,
            quantity,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn splits_across_two_tiers() {
        assert_eq!(
            buckets(dec!(1500000), &[dec!(1000000), dec!(10000000)]),
            vec![dec!(1000000), dec!(500000), dec!(0)]
        );
    }

    #[test]
    fn overflows_into_last_tier() {
        assert_eq!(
            buckets(dec!(20001), &[dec!(1000), dec!(10000)]),
            vec![dec!(1000), dec!(9000), dec!(10001)]
        );
    }

    #[test]
    fn total_below_first_breakpoint() {
        assert_eq!(
            buckets(dec!(10), &[dec!(1000), dec!(10000)]),
            vec![dec!(10), dec!(0), dec!(0)]
        );
    }

    #[test]
    fn no_breakpoints_is_single_bucket() {
        assert_eq!(buckets(dec!(42), &[]), vec![dec!(42)]);
    }

    #[test]
    fn zero_total() {
        assert_eq!(buckets(Decimal::ZERO, &[dec!(5)]), vec![dec!(0), dec!(0)]);
    }

    #[test]
    fn named_tiers_skip_empty_tiers_after_first() {
        let tiers = named_tiers(
            dec!(1500),
            &[dec!(1000), dec!(10000)],
            &["first 1K", "next 9K", "over 10K"],
        );

        assert_eq!(
            tiers,
            vec![
                Tier { name: "first 1K", start_usage_amount: dec!(0), quantity: dec!(1000) },
                Tier { name: "next 9K", start_usage_amount: dec!(1000), quantity: dec!(500) },
            ]
        );

        let tiers = named_tiers(Decimal::ZERO, &[dec!(1000)], &["first 1K", "over 1K"]);
        assert_eq!(tiers.len(), 1);
    }
}
