use tidepool_common::TelemetryCounters;

/// Stats from a discovery run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub counters: TelemetryCounters,
    pub suggestions_generated: u32,
    pub suggestions_accepted: u32,
    pub suggestions_skipped: u32,
    pub general_deferred: u32,
    pub reference_links_harvested: u32,
    pub feed_items_found: u32,
    pub items_requeued: u32,
    pub oracle_degraded: u32,
    pub unique_domains_persisted: u32,
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Discovery Run Complete ===")?;
        writeln!(f, "Items processed:    {}", self.counters.processed)?;
        writeln!(f, "Persisted:          {}", self.counters.persist_ok)?;
        writeln!(f, "Duplicates:         {}", self.counters.duplicates)?;
        writeln!(f, "Paywall blocked:    {}", self.counters.paywall_blocked)?;
        writeln!(f, "Extract ok:         {}", self.counters.extract_ok)?;
        writeln!(f, "Relevance fails:    {}", self.counters.relevance_fail)?;
        writeln!(f, "Skipped:            {}", self.counters.skipped)?;
        writeln!(f, "Unique domains:     {}", self.unique_domains_persisted)?;
        if self.suggestions_generated > 0 {
            writeln!(f, "\nQuery expansion:")?;
            writeln!(f, "  Generated:        {}", self.suggestions_generated)?;
            writeln!(f, "  Accepted:         {}", self.suggestions_accepted)?;
            writeln!(f, "  Filtered out:     {}", self.suggestions_skipped)?;
            writeln!(f, "  General deferred: {}", self.general_deferred)?;
        }
        if self.reference_links_harvested > 0 {
            writeln!(f, "Reference links:    {}", self.reference_links_harvested)?;
        }
        if self.feed_items_found > 0 {
            writeln!(f, "Feed items:         {}", self.feed_items_found)?;
        }
        if self.items_requeued > 0 {
            writeln!(f, "Requeued:           {}", self.items_requeued)?;
        }
        if self.oracle_degraded > 0 {
            writeln!(f, "Oracle degraded:    {}", self.oracle_degraded)?;
        }
        Ok(())
    }
}
