use crate::config::{MAX_PARAMETERS, PARAMS_PER_ROW, TARGET_TABLE};
use crate::errors::TemplateError;

/// A multi-row INSERT with numbered placeholders, built once and rebound for every batch.
///
/// The statement looks like so:
///
/// ```text
/// INSERT INTO [HR].[Employees] (LastName, FirstName, Salary, SSN) VALUES
///  (@P1,@P2,@P3,@P4),
///  (@P5,@P6,@P7,@P8),
///  ...
/// ```
///
/// Row `i` owns placeholders `@P{4i+1}` to `@P{4i+4}`, in column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTemplate {
    sql: String,
    batch_size: usize,
}

impl BatchTemplate {
    pub fn build(batch_size: usize) -> Result<Self, TemplateError> {
        if batch_size == 0 {
            return Err(TemplateError::EmptyBatch);
        }

        let parameters = batch_size.checked_mul(PARAMS_PER_ROW).unwrap_or(usize::MAX);
        if parameters > MAX_PARAMETERS {
            return Err(TemplateError::TooManyParameters {
                batch_size,
                parameters,
                limit: MAX_PARAMETERS,
            });
        }

        let mut sql = format!(
            "INSERT INTO {TARGET_TABLE} (LastName, FirstName, Salary, SSN) VALUES "
        );

        for row in 0..batch_size {
            if row > 0 {
                sql.push_str(", ");
            }
            let first = row * PARAMS_PER_ROW + 1;
            sql.push_str(&format!(
                "(@P{},@P{},@P{},@P{})",
                first,
                first + 1,
                first + 2,
                first + 3
            ));
        }

        Ok(Self { sql, batch_size })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn parameter_count(&self) -> usize {
        self.batch_size * PARAMS_PER_ROW
    }
}
