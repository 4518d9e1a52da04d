use log::info;

use crate::backend::table::VALUE;
use crate::backend::{same_column, Table, Tables};
use crate::error::Result;
use crate::model::settings::{Setting, PAUSED};
use crate::model::voter::yes_no;

use super::column;

/// The election-paused switch, kept in the `SETTINGS` table so that every
/// instance of the server sees the same value.
#[derive(Clone)]
pub struct ElectionControl {
    tables: Tables,
}

impl ElectionControl {
    pub fn new(tables: Tables) -> Self {
        Self { tables }
    }

    pub async fn is_paused(&self) -> Result<bool> {
        Ok(self
            .tables
            .records::<Setting>()
            .await?
            .into_iter()
            .find(|s| same_column(&s.record.key, PAUSED))
            .map_or(false, |s| s.record.value.eq_ignore_ascii_case("YES")))
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        let (header, settings) = self.tables.records_with_header::<Setting>().await?;
        match settings.iter().find(|s| same_column(&s.record.key, PAUSED)) {
            Some(setting) => {
                let value = column(Table::Settings, &header, VALUE)?;
                self.tables
                    .update_cell(Table::Settings, setting.row, value, yes_no(paused))
                    .await?
            }
            None => {
                self.tables
                    .append(&[Setting::new(PAUSED, yes_no(paused))])
                    .await?
            }
        }
        info!("Election {}", if paused { "paused" } else { "resumed" });
        Ok(())
    }
}
