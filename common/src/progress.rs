use enum_map::EnumMap;

use crate::push::Decision;

/// Running count of copy decisions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Tally {
    counts: EnumMap<Decision, u64>,
}

impl Tally {
    pub fn record(&mut self, decision: Decision) {
        self.counts[decision] += 1;
    }

    pub fn skipped(&self) -> u64 {
        self.counts[Decision::Skip]
    }

    pub fn copied(&self) -> u64 {
        self.counts[Decision::Copy]
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl std::fmt::Display for Tally {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Skip: {}, Copy: {}, All: {}",
            self.skipped(),
            self.copied(),
            self.total()
        )
    }
}

/// Transient status line on stderr.
///
/// Drawn through `indicatif`, which only draws on a terminal and rate limits redraws. When
/// stderr is not a terminal the final tally and any notes are still printed as plain lines.
pub struct StatusLine {
    bar: indicatif::ProgressBar,
    suppressed: bool,
}

impl StatusLine {
    pub fn new(suppressed: bool) -> Result<Self, indicatif::style::TemplateError> {
        let bar = if suppressed {
            indicatif::ProgressBar::hidden()
        } else {
            indicatif::ProgressBar::with_draw_target(None, indicatif::ProgressDrawTarget::stderr())
        };
        bar.set_style(indicatif::ProgressStyle::with_template("{msg}")?);
        Ok(Self { bar, suppressed })
    }

    /// Prints a permanent line above the status line.
    pub fn note(&self, msg: &str) {
        if self.suppressed {
            return;
        }
        if self.bar.is_hidden() {
            eprintln!("{msg}");
        } else {
            self.bar.println(msg);
        }
    }

    pub fn update(&self, tally: &Tally) {
        self.bar.set_message(tally.to_string());
    }

    pub fn finish(&self, tally: &Tally) {
        if self.suppressed {
            return;
        }
        if self.bar.is_hidden() {
            eprintln!("{tally}");
        } else {
            self.bar.finish_with_message(tally.to_string());
        }
    }
}

/// Consumes status events until every sender is gone, re-rendering after each one.
pub async fn aggregate(
    mut events: tokio::sync::mpsc::Receiver<Decision>,
    status_line: StatusLine,
) -> Tally {
    let mut tally = Tally::default();
    while let Some(decision) = events.recv().await {
        tally.record(decision);
        status_line.update(&tally);
    }
    status_line.finish(&tally);
    tally
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_renders_counts() {
        let mut tally = Tally::default();
        assert_eq!(tally.to_string(), "Skip: 0, Copy: 0, All: 0");
        tally.record(Decision::Skip);
        tally.record(Decision::Copy);
        tally.record(Decision::Copy);
        assert_eq!(tally.skipped(), 1);
        assert_eq!(tally.copied(), 2);
        assert_eq!(tally.to_string(), "Skip: 1, Copy: 2, All: 3");
    }

    #[tokio::test]
    async fn aggregate_stops_when_senders_are_gone() -> anyhow::Result<()> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let aggregator = tokio::spawn(aggregate(rx, StatusLine::new(true)?));
        let mut senders = tokio::task::JoinSet::new();
        for worker in 0..8u64 {
            let tx = tx.clone();
            senders.spawn(async move {
                for idx in 0..25u64 {
                    let decision = if (worker + idx) % 5 == 0 {
                        Decision::Skip
                    } else {
                        Decision::Copy
                    };
                    tx.send(decision).await.unwrap();
                }
            });
        }
        drop(tx);
        while let Some(res) = senders.join_next().await {
            res?;
        }
        let tally = aggregator.await?;
        assert_eq!(tally.total(), 200);
        assert_eq!(tally.skipped(), 40);
        assert_eq!(tally.copied(), 160);
        Ok(())
    }
}
