use crate::domain::money::Balance;
use crate::domain::principal::PrincipalId;
use crate::domain::task::Task;
use crate::error::Result;
use std::io::Write;

/// Writes the end-of-run audit report as CSV: a balances section followed by
/// a task section. Amounts are rendered with 2 decimal places.
pub struct ReportWriter<W: Write> {
    out: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write_balances(&mut self, balances: &[(PrincipalId, Balance)]) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(&mut self.out);
        wtr.write_record(["principal", "balance"])?;
        for (principal, balance) in balances {
            wtr.write_record(&[principal.to_string(), balance.to_string()])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_tasks(&mut self, tasks: &[Task]) -> Result<()> {
        writeln!(self.out)?;
        let mut wtr = csv::Writer::from_writer(&mut self.out);
        wtr.write_record(["id", "title", "poster", "worker", "payment", "status"])?;
        for task in tasks {
            wtr.write_record(&[
                task.id.0.to_string(),
                task.title.clone(),
                task.poster.to_string(),
                task.worker
                    .as_ref()
                    .map(|w| w.to_string())
                    .unwrap_or_default(),
                task.payment.to_string(),
                task.status.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }
}
