//! CSV ladder import
//!
//! Expected header:
//! `tier_id,avg_price_threshold,target_quantity,buy_price,buy_quantity,sell_price,sell_quantity`.
//! An empty `avg_price_threshold` cell means the rung has no price threshold.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::error::StoreError;
use crate::types::LadderRung;

pub fn read_rungs_csv(path: impl AsRef<Path>) -> Result<Vec<LadderRung>, StoreError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
    let rungs = read_rungs_from_reader(file)?;
    info!("Read {} rungs from {}", rungs.len(), path.display());
    Ok(rungs)
}

pub fn read_rungs_from_reader<R: Read>(reader: R) -> Result<Vec<LadderRung>, StoreError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut rungs = Vec::new();
    for record in rdr.deserialize() {
        let rung: LadderRung = record?;
        rungs.push(rung);
    }
    Ok(rungs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_rows_in_order() {
        let data = "\
tier_id,avg_price_threshold,target_quantity,buy_price,buy_quantity,sell_price,sell_quantity
A,,0,95.5,5,0,0
B, 98.0 ,10,94.0,5,101.0,5
C,96.0,20,93.0,5,100.0,5
";
        let rungs = read_rungs_from_reader(data.as_bytes()).unwrap();
        assert_eq!(rungs.len(), 3);
        assert_eq!(rungs[0].tier_id, "A");
        assert_eq!(rungs[0].avg_price_threshold, None);
        assert_eq!(rungs[1].avg_price_threshold, Some(98.0));
        assert_eq!(rungs[2].target_quantity, 20);
        assert_eq!(rungs[2].sell_price, 100.0);
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let data = "\
tier_id,avg_price_threshold,target_quantity,buy_price,buy_quantity,sell_price,sell_quantity
A,,zero,95.5,5,0,0
";
        assert!(matches!(
            read_rungs_from_reader(data.as_bytes()),
            Err(StoreError::Csv(_))
        ));
    }

    #[test]
    fn test_negative_values_are_kept_for_later_validation() {
        let data = "\
tier_id,avg_price_threshold,target_quantity,buy_price,buy_quantity,sell_price,sell_quantity
A,,0,95.5,-5,0,0
";
        let rungs = read_rungs_from_reader(data.as_bytes()).unwrap();
        assert!(rungs[0].validate().is_err());
    }
}
