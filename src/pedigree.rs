//! Pedigree (PED) loading
//!
//! Reads six-column PED files into [`Family`] models. Only the family used
//! for annotation is kept.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::error::{InputError, PedigreeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phenotype {
    Affected,
    Unaffected,
    Unknown,
}

/// One member of a family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Individual {
    pub id: String,
    pub father: Option<String>,
    pub mother: Option<String>,
    pub sex: Sex,
    pub phenotype: Phenotype,
}
impl Individual {
    #[must_use]
    pub fn is_affected(&self) -> bool {
        self.phenotype == Phenotype::Affected
    }
}

/// The family model used to interpret genotypes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Family {
    pub id: String,
    pub members: Vec<Individual>,
}
impl Family {
    #[must_use]
    pub fn member(&self, id: &str) -> Option<&Individual> {
        self.members.iter().find(|m| m.id == id)
    }

    pub fn affected(&self) -> impl Iterator<Item = &Individual> {
        self.members.iter().filter(|m| m.is_affected())
    }

    pub fn unaffected(&self) -> impl Iterator<Item = &Individual> {
        self.members
            .iter()
            .filter(|m| m.phenotype == Phenotype::Unaffected)
    }

    /// Load one family from a PED file
    ///
    /// With `family_id`, that family is selected; otherwise the first family
    /// appearing in the file.
    pub fn load(path: &Path, family_id: Option<&str>) -> Result<Self> {
        if !path.is_file() {
            return Err(InputError::MissingFile(path.to_path_buf()).into());
        }
        let handle = File::open(path).map_err(|source| InputError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(handle), path, family_id)
    }

    pub fn from_reader<R: BufRead>(reader: R, path: &Path, family_id: Option<&str>) -> Result<Self> {
        let mut families: Vec<Family> = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line_no = idx as u64 + 1;
            let line = line.map_err(|source| InputError::Read {
                source_name: path.display().to_string(),
                line: line_no,
                source,
            })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 6 {
                return Err(PedigreeError::Malformed {
                    path: path.to_path_buf(),
                    line: line_no,
                    found: columns.len(),
                }
                .into());
            }
            let individual = Individual {
                id: columns[1].to_string(),
                father: parent(columns[2]),
                mother: parent(columns[3]),
                sex: match columns[4] {
                    "1" => Sex::Male,
                    "2" => Sex::Female,
                    _ => Sex::Unknown,
                },
                phenotype: match columns[5] {
                    "2" => Phenotype::Affected,
                    "1" => Phenotype::Unaffected,
                    _ => Phenotype::Unknown,
                },
            };
            match families.iter_mut().find(|f| f.id == columns[0]) {
                Some(family) => family.members.push(individual),
                None => families.push(Family {
                    id: columns[0].to_string(),
                    members: vec![individual],
                }),
            }
        }

        match family_id {
            Some(id) => families
                .into_iter()
                .find(|f| f.id == id)
                .ok_or_else(|| PedigreeError::UnknownFamily(id.to_string()).into()),
            None => families
                .into_iter()
                .next()
                .ok_or_else(|| PedigreeError::NoFamilies(path.to_path_buf()).into()),
        }
    }
}

fn parent(value: &str) -> Option<String> {
    (value != "0" && value != ".").then(|| value.to_string())
}
