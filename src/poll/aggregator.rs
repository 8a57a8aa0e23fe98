use super::question::Response;

/// Derives per-option counts from a response set. Used for live updates and
/// for archiving, so both always agree.
pub struct ResultAggregator;

impl ResultAggregator {
    /// Out-of-range and non-numeric indices are dropped, not reported
    pub fn tally<'a, I>(option_count: usize, responses: I) -> Vec<u32>
    where
        I: IntoIterator<Item = &'a Response>,
    {
        let mut counts = vec![0u32; option_count];

        for response in responses {
            let bucket = response
                .option_index
                .and_then(|index| usize::try_from(index).ok())
                .and_then(|index| counts.get_mut(index));

            if let Some(count) = bucket {
                *count += 1;
            }
        }

        counts
    }
}
