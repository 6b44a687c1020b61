use rand::Rng;
use std::ops::Range;

use crate::corpus::NameCorpus;
use crate::errors::GenerateError;

pub const SALARY_RANGE: Range<i32> = 50_000..250_000;

const SSN_AREA: Range<u16> = 100..1000;
const SSN_GROUP: Range<u16> = 10..100;
const SSN_SERIAL: Range<u16> = 1000..10000;

/// One synthetic employee, bound into a single row of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowValues {
    pub last_name: String,
    pub first_name: String,
    pub salary: i32,
    pub ssn: String,
}

/// Draw a row of random values. Names are picked with replacement.
pub fn generate_row<R: Rng>(
    rng: &mut R,
    first_names: &NameCorpus,
    last_names: &NameCorpus,
) -> Result<RowValues, GenerateError> {
    let salary = rng.gen_range(SALARY_RANGE);
    let ssn = format!(
        "{:03}-{:02}-{:04}",
        rng.gen_range(SSN_AREA),
        rng.gen_range(SSN_GROUP),
        rng.gen_range(SSN_SERIAL)
    );

    let first_name = pick(rng, first_names, "first name")?;
    let last_name = pick(rng, last_names, "last name")?;

    Ok(RowValues {
        last_name,
        first_name,
        salary,
        ssn,
    })
}

fn pick<R: Rng>(
    rng: &mut R,
    corpus: &NameCorpus,
    kind: &str,
) -> Result<String, GenerateError> {
    if corpus.is_empty() {
        return Err(GenerateError::InvalidState(format!(
            "{kind} corpus is empty"
        )));
    }

    corpus
        .get(rng.gen_range(0..corpus.len()))
        .map(String::from)
        .ok_or_else(|| GenerateError::InvalidState(format!("{kind} index out of range")))
}

#[cfg(test)]
mod tests {
    use super::{generate_row, SALARY_RANGE};
    use crate::corpus::NameCorpus;
    use crate::errors::GenerateError;
    use rand::SeedableRng;
    use rand_chacha::ChaChaRng;

    fn is_ssn(value: &str) -> bool {
        let groups: Vec<&str> = value.split('-').collect();

        groups.len() == 3
            && groups
                .iter()
                .zip([3, 2, 4])
                .all(|(g, width)| g.len() == width && g.bytes().all(|b| b.is_ascii_digit()))
    }

    #[test]
    fn test_names_come_from_corpora() {
        let first: NameCorpus = ["Ann", "Bo"].into_iter().collect();
        let last: NameCorpus = ["Lee", "Ng"].into_iter().collect();
        let mut rng = ChaChaRng::seed_from_u64(7);

        for _ in 0..1000 {
            let row = generate_row(&mut rng, &first, &last).unwrap();

            assert!(first.contains(&row.first_name), "{}", row.first_name);
            assert!(last.contains(&row.last_name), "{}", row.last_name);
        }
    }

    #[test]
    fn test_salary_and_ssn_shape() {
        let first: NameCorpus = ["Ann"].into_iter().collect();
        let last: NameCorpus = ["Lee"].into_iter().collect();
        let mut rng = ChaChaRng::seed_from_u64(1);

        for _ in 0..10_000 {
            let row = generate_row(&mut rng, &first, &last).unwrap();

            assert!(SALARY_RANGE.contains(&row.salary), "{}", row.salary);
            assert!(is_ssn(&row.ssn), "{}", row.ssn);
        }
    }

    #[test]
    fn test_same_seed_same_rows() {
        let first: NameCorpus = ["Ann", "Bo", "Cy"].into_iter().collect();
        let last: NameCorpus = ["Lee", "Ng", "Oh"].into_iter().collect();

        let mut a = ChaChaRng::seed_from_u64(99);
        let mut b = ChaChaRng::seed_from_u64(99);

        for _ in 0..10 {
            assert_eq!(
                generate_row(&mut a, &first, &last).unwrap(),
                generate_row(&mut b, &first, &last).unwrap()
            );
        }
    }

    #[test]
    fn test_fails_on_empty_corpus() {
        let first = NameCorpus::from_lines("");
        let last: NameCorpus = ["Lee"].into_iter().collect();
        let mut rng = ChaChaRng::seed_from_u64(1);

        assert_eq!(
            generate_row(&mut rng, &first, &last),
            Err(GenerateError::InvalidState(
                "first name corpus is empty".into()
            ))
        );
    }

    #[test]
    fn test_ssn_helper_rejects_bad_shapes() {
        assert!(is_ssn("123-45-6789"));
        assert!(!is_ssn("123-456-789"));
        assert!(!is_ssn("12a-45-6789"));
        assert!(!is_ssn("123456789"));
    }
}
