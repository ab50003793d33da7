//! Check command: verify every reference in the environment resolves
//!
//! Destinations are ignored so nothing is written to disk, and values are
//! never printed.

use crate::cli::CheckArgs;
use crate::output;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::ExitCode;
use tabled::{settings::Style, Table, Tabled};
use unseal_engine::{
    BindingFailure, BindingSet, BindingValue, Engine, Error, SecretReference,
};

#[derive(Debug, Tabled, Serialize)]
struct CheckRow {
    #[tabled(rename = "BINDING")]
    binding: String,
    #[tabled(rename = "REFERENCE")]
    reference: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

pub async fn run(args: CheckArgs, engine: &Engine) -> Result<ExitCode> {
    let bindings = match BindingSet::from_env() {
        Ok(bindings) => bindings,
        // Malformed references: report them, there is nothing to resolve
        Err(Error::Resolution { failures }) => {
            let rows = failures.iter().map(failed_row).collect();
            render(rows, args.json)?;
            return Ok(ExitCode::from(crate::EXIT_MISUSE));
        }
        Err(e) => return Err(e.into()),
    };

    let probe = without_destinations(&bindings);
    if !probe.has_references() {
        if args.json {
            println!("[]");
        } else {
            output::info("No secret references in the environment");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let failures: BTreeMap<String, BindingFailure> = match engine.resolve(&probe).await {
        Ok(_) => BTreeMap::new(),
        Err(Error::Resolution { failures }) => failures
            .into_iter()
            .map(|f| (f.binding.clone(), f))
            .collect(),
        Err(e) => return Err(e.into()),
    };

    let rows: Vec<CheckRow> = probe
        .references()
        .map(|(binding, _)| match failures.get(binding) {
            Some(failure) => failed_row(failure),
            None => CheckRow {
                binding: binding.to_string(),
                reference: probe.raw_reference(binding).unwrap_or_default().to_string(),
                status: "ok".to_string(),
            },
        })
        .collect();
    let total = rows.len();
    render(rows, args.json)?;

    if failures.is_empty() {
        if !args.json {
            output::success(&format!("All {} reference(s) resolved", total));
        }
        Ok(ExitCode::SUCCESS)
    } else {
        if !args.json {
            output::error(&format!("{} of {} reference(s) failed", failures.len(), total));
        }
        Ok(ExitCode::FAILURE)
    }
}

/// Copy of `bindings` with every destination dropped
///
/// The raw strings are kept so the report shows what the user wrote.
fn without_destinations(bindings: &BindingSet) -> BindingSet {
    let mut probe = BindingSet::new();
    for (key, value) in bindings.iter() {
        let value = match value {
            BindingValue::Reference { raw, reference } => BindingValue::Reference {
                raw: raw.clone(),
                reference: SecretReference::new(reference.key().clone(), None),
            },
            other => other.clone(),
        };
        probe.push(key, value);
    }
    probe
}

fn failed_row(failure: &BindingFailure) -> CheckRow {
    CheckRow {
        binding: failure.binding.clone(),
        reference: failure.reference.clone(),
        status: format!("{}: {}", failure.kind, failure.detail),
    }
}

fn render(rows: Vec<CheckRow>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        output::header("Secret references");
        let mut table = Table::new(rows);
        table.with(Style::sharp());
        println!("{}", table);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unseal_engine::Destination;

    #[test]
    fn test_destinations_are_stripped() {
        let bindings = BindingSet::parse([
            ("TLS_KEY", "secret://proj/tls/key#/etc/secrets/tls.key"),
            ("CERT", "secret://proj/cert#tempfile"),
            ("PORT", "8080"),
        ])
        .unwrap();

        let probe = without_destinations(&bindings);
        assert_eq!(probe.len(), 3);
        assert_eq!(probe.get_str("PORT"), Some("8080"));
        for (_, reference) in probe.references() {
            assert!(reference.destination().is_none());
        }
        assert_eq!(
            probe.raw_reference("TLS_KEY"),
            Some("secret://proj/tls/key#/etc/secrets/tls.key")
        );
        // Original untouched
        let (_, original) = bindings.references().next().unwrap();
        assert!(matches!(original.destination(), Some(Destination::Path(_))));
    }

    #[test]
    fn test_failed_row_has_no_value() {
        let failure = BindingFailure {
            binding: "API_KEY".to_string(),
            reference: "secret://proj/missing".to_string(),
            kind: unseal_engine::ErrorKind::NotFound,
            detail: "object proj/missing does not exist".to_string(),
        };
        let row = failed_row(&failure);
        assert_eq!(row.binding, "API_KEY");
        assert!(row.status.starts_with("not-found"));
    }
}
