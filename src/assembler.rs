use crate::error::PipelineError;
use crate::types::{Batch, ClassificationResult, ClassifiedRow, OutputTable, TableHeader};

/// Puts per-batch results back at their absolute row positions.
///
/// Result `j` of a batch belongs to row `batch.start + j`. Every slot in
/// `0..original_row_count` has to be written exactly once.
pub fn assemble(
    header: &TableHeader,
    original_row_count: usize,
    batches: &[Batch<'_>],
    results: Vec<Vec<ClassificationResult>>,
) -> Result<OutputTable, PipelineError> {
    if batches.len() != results.len() {
        return Err(PipelineError::Assembly(format!(
            "{} batches but {} result sets",
            batches.len(),
            results.len()
        )));
    }

    let mut slots: Vec<Option<ClassifiedRow>> = vec![None; original_row_count];
    for (batch, batch_results) in batches.iter().zip(results) {
        if batch.len() != batch_results.len() {
            return Err(PipelineError::Assembly(format!(
                "batch {} has {} rows but {} results",
                batch.number,
                batch.len(),
                batch_results.len()
            )));
        }

        for (position, (row, classification)) in
            batch.rows.iter().zip(batch_results).enumerate()
        {
            let index = batch.start + position;
            if row.index != index {
                return Err(PipelineError::Assembly(format!(
                    "row {} found at position {index}",
                    row.index
                )));
            }
            let slot = slots.get_mut(index).ok_or_else(|| {
                PipelineError::Assembly(format!(
                    "row {index} is outside the table of {original_row_count} rows"
                ))
            })?;
            if slot.is_some() {
                return Err(PipelineError::Assembly(format!(
                    "row {index} classified twice"
                )));
            }
            *slot = Some(ClassifiedRow {
                row: row.clone(),
                classification,
            });
        }
    }

    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(index, slot)| slot.is_none().then_some(index))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::IncompleteAssembly {
            missing,
            row_count: original_row_count,
        });
    }

    Ok(OutputTable {
        header: header.clone(),
        rows: slots.into_iter().flatten().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::split;
    use crate::types::Row;

    fn header() -> TableHeader {
        TableHeader {
            keyword: "Keyword".into(),
            brand: "Brand".into(),
            categories: Vec::new(),
        }
    }

    fn rows(count: usize) -> Vec<Row> {
        (0..count)
            .map(|index| Row {
                index,
                keyword: format!("kw{index}"),
                brand: "Acme".into(),
                categories: Vec::new(),
            })
            .collect()
    }

    fn label_for(batch: &Batch<'_>) -> Vec<ClassificationResult> {
        batch
            .rows
            .iter()
            .map(|row| ClassificationResult::from(format!("label-{}", row.keyword).as_str()))
            .collect()
    }

    #[test]
    fn results_land_at_absolute_indices() {
        let rows = rows(7);
        let batches = split(&rows, 3).unwrap();
        let results: Vec<_> = batches.iter().map(label_for).collect();
        let expected = results.clone();

        let output = assemble(&header(), rows.len(), &batches, results).unwrap();
        assert_eq!(output.len(), 7);
        for (i, classified) in output.rows.iter().enumerate() {
            assert_eq!(classified.row, rows[i]);
            assert_eq!(classified.classification, expected[i / 3][i % 3]);
        }
    }

    #[test]
    fn empty_table() {
        let output = assemble(&header(), 0, &[], Vec::new()).unwrap();
        assert_eq!(output.len(), 0);
    }

    #[test]
    fn batch_and_result_counts_must_match() {
        let rows = rows(4);
        let batches = split(&rows, 2).unwrap();
        let results = vec![label_for(&batches[0])];
        let err = assemble(&header(), 4, &batches, results).unwrap_err();
        assert!(matches!(err, PipelineError::Assembly(_)));
    }

    #[test]
    fn per_batch_lengths_must_match() {
        let rows = rows(4);
        let batches = split(&rows, 2).unwrap();
        let mut results: Vec<_> = batches.iter().map(label_for).collect();
        results[1].pop();
        let err = assemble(&header(), 4, &batches, results).unwrap_err();
        assert!(matches!(err, PipelineError::Assembly(_)));
    }

    #[test]
    fn missing_batch_is_incomplete() {
        let rows = rows(5);
        let batches = split(&rows, 3).unwrap();
        let results = vec![label_for(&batches[0])];
        let err = assemble(&header(), 5, &batches[..1], results).unwrap_err();
        match err {
            PipelineError::IncompleteAssembly { missing, row_count } => {
                assert_eq!(missing, vec![3, 4]);
                assert_eq!(row_count, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicated_batch_is_rejected() {
        let rows = rows(4);
        let batches = split(&rows, 2).unwrap();
        let twice = vec![batches[0], batches[0]];
        let results = vec![label_for(&batches[0]), label_for(&batches[0])];
        let err = assemble(&header(), 4, &twice, results).unwrap_err();
        assert!(matches!(err, PipelineError::Assembly(msg) if msg.contains("twice")));
    }

    #[test]
    fn row_outside_table_is_rejected() {
        let rows = rows(4);
        let batches = split(&rows, 2).unwrap();
        let results: Vec<_> = batches.iter().map(label_for).collect();
        let err = assemble(&header(), 3, &batches, results).unwrap_err();
        assert!(matches!(err, PipelineError::Assembly(msg) if msg.contains("outside")));
    }
}
