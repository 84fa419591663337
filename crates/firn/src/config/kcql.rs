//! KCQL statement parsing.
//!
//! One statement binds one source topic to one bucket/prefix:
//!
//! ```text
//! INSERT INTO bucket:prefix SELECT * FROM topic
//!   [PARTITIONBY sel, sel, ...]
//!   [STOREAS `FORMAT`]
//!   [WITHPARTITIONER = Values | KeysAndValues]
//!   [WITH_FLUSH_COUNT = n] [WITH_FLUSH_SIZE = n] [WITH_FLUSH_INTERVAL = seconds]
//! ```
//!
//! Statements are `;`-separated. Keywords are case-insensitive; topic names
//! and formats may be backquoted.

use snafu::prelude::*;

use crate::error::{
    ConfigError, InvalidThresholdSnafu, KcqlSyntaxSnafu, NestedPrefixUnsupportedSnafu,
    SelectorRequiresValuesModeSnafu, UnknownPartitionerModeSnafu,
};
use crate::format::Format;
use crate::naming::PartitionDisplay;
use crate::partition::PartitionField;

/// One parsed KCQL statement.
#[derive(Debug, Clone)]
pub struct KcqlStatement {
    pub topic: String,
    pub bucket: String,
    pub prefix: String,
    pub partition_by: Vec<PartitionField>,
    pub format: Format,
    pub partitioner: PartitionDisplay,
    pub flush_count: Option<u64>,
    pub flush_size: Option<u64>,
    pub flush_interval_secs: Option<u64>,
}

/// Parse a `;`-separated list of statements.
pub fn parse(kcql: &str) -> Result<Vec<KcqlStatement>, ConfigError> {
    let statements: Vec<KcqlStatement> = kcql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_statement)
        .collect::<Result<_, _>>()?;

    ensure!(
        !statements.is_empty(),
        KcqlSyntaxSnafu {
            message: "no statements found",
        }
    );
    Ok(statements)
}

fn parse_statement(statement: &str) -> Result<KcqlStatement, ConfigError> {
    let tokens = tokenize(statement)?;
    let mut cursor = Cursor::new(&tokens, statement);

    cursor.expect_keyword("INSERT")?;
    cursor.expect_keyword("INTO")?;
    let target = cursor.next_value("target bucket")?;
    let (bucket, prefix) = split_target(&target)?;

    cursor.expect_keyword("SELECT")?;
    cursor.expect_keyword("*")?;
    cursor.expect_keyword("FROM")?;
    let topic = cursor.next_value("source topic")?;

    let mut partition_by = Vec::new();
    let mut format = Format::Json;
    let mut partitioner = PartitionDisplay::KeysAndValues;
    let mut flush_count = None;
    let mut flush_size = None;
    let mut flush_interval_secs = None;

    while let Some(token) = cursor.next() {
        match token.to_ascii_uppercase().as_str() {
            "PARTITIONBY" => {
                loop {
                    let selector = cursor.next_value("partition selector")?;
                    partition_by.push(PartitionField::parse(&selector)?);
                    if !cursor.eat(",") {
                        break;
                    }
                }
            }
            "STOREAS" => {
                let value = cursor.next_value("storage format")?;
                format = Format::parse(&value)?;
            }
            "WITHPARTITIONER" => {
                cursor.eat("=");
                let value = cursor.next_value("partitioner mode")?;
                partitioner = match value.to_ascii_lowercase().as_str() {
                    "values" => PartitionDisplay::Values,
                    "keysandvalues" => PartitionDisplay::KeysAndValues,
                    _ => return UnknownPartitionerModeSnafu { value }.fail(),
                };
            }
            "WITH_FLUSH_COUNT" => {
                flush_count = Some(cursor.next_threshold("WITH_FLUSH_COUNT")?);
            }
            "WITH_FLUSH_SIZE" => {
                flush_size = Some(cursor.next_threshold("WITH_FLUSH_SIZE")?);
            }
            "WITH_FLUSH_INTERVAL" => {
                flush_interval_secs = Some(cursor.next_threshold("WITH_FLUSH_INTERVAL")?);
            }
            other => {
                return KcqlSyntaxSnafu {
                    message: format!("unexpected token '{other}' in '{statement}'"),
                }
                .fail()
            }
        }
    }

    // _topic and _partition have no display name, so they only make sense
    // when values alone form the path.
    if partitioner == PartitionDisplay::KeysAndValues {
        for field in &partition_by {
            if matches!(field, PartitionField::Topic | PartitionField::Partition) {
                let selector = match field {
                    PartitionField::Topic => "_topic",
                    _ => "_partition",
                };
                return SelectorRequiresValuesModeSnafu { selector }.fail();
            }
        }
    }

    Ok(KcqlStatement {
        topic,
        bucket,
        prefix,
        partition_by,
        format,
        partitioner,
        flush_count,
        flush_size,
        flush_interval_secs,
    })
}

fn split_target(target: &str) -> Result<(String, String), ConfigError> {
    let (bucket, prefix) = match target.split_once(':') {
        Some((bucket, prefix)) => (bucket.to_string(), prefix.to_string()),
        None => (target.to_string(), String::new()),
    };
    ensure!(
        !bucket.is_empty(),
        KcqlSyntaxSnafu {
            message: "empty bucket in INSERT INTO target",
        }
    );
    ensure!(
        !prefix.contains('/'),
        NestedPrefixUnsupportedSnafu { prefix }
    );
    Ok((bucket, prefix))
}

fn tokenize(statement: &str) -> Result<Vec<String>, ConfigError> {
    let mut tokens = Vec::new();
    let mut chars = statement.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '`' => {
                chars.next();
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some('`') => break,
                        Some(c) => token.push(c),
                        None => {
                            return KcqlSyntaxSnafu {
                                message: "unterminated backquote",
                            }
                            .fail()
                        }
                    }
                }
                tokens.push(token);
            }
            ',' | '=' => {
                chars.next();
                tokens.push(c.to_string());
            }
            _ => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == ',' || c == '=' || c == '`' {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }

    Ok(tokens)
}

struct Cursor<'a> {
    tokens: &'a [String],
    position: usize,
    statement: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [String], statement: &'a str) -> Self {
        Self {
            tokens,
            position: 0,
            statement,
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.tokens.get(self.position)?.as_str();
        self.position += 1;
        Some(token)
    }

    fn next_value(&mut self, what: &str) -> Result<String, ConfigError> {
        match self.next() {
            Some(token) => Ok(token.to_string()),
            None => KcqlSyntaxSnafu {
                message: format!("expected {what} in '{}'", self.statement),
            }
            .fail(),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ConfigError> {
        match self.next() {
            Some(token) if token.eq_ignore_ascii_case(keyword) => Ok(()),
            other => KcqlSyntaxSnafu {
                message: format!(
                    "expected '{keyword}', found '{}' in '{}'",
                    other.unwrap_or("<end>"),
                    self.statement
                ),
            }
            .fail(),
        }
    }

    /// Consume the next token if it equals `token`.
    fn eat(&mut self, token: &str) -> bool {
        if self.tokens.get(self.position).map(String::as_str) == Some(token) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn next_threshold(&mut self, clause: &str) -> Result<u64, ConfigError> {
        self.eat("=");
        let value = self.next_value(clause)?;
        let parsed: u64 = value.parse().ok().filter(|v| *v > 0).context(
            InvalidThresholdSnafu {
                clause,
                value: value.clone(),
            },
        )?;
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_statement() {
        let statements =
            parse("INSERT INTO bucket:prefix SELECT * FROM myTopic").unwrap();
        assert_eq!(statements.len(), 1);
        let s = &statements[0];
        assert_eq!(s.bucket, "bucket");
        assert_eq!(s.prefix, "prefix");
        assert_eq!(s.topic, "myTopic");
        assert_eq!(s.format, Format::Json);
        assert_eq!(s.partitioner, PartitionDisplay::KeysAndValues);
        assert!(s.partition_by.is_empty());
        assert!(s.flush_count.is_none());
    }

    #[test]
    fn full_statement() {
        let statements = parse(
            "insert into bucket:backups select * from `my-topic` \
             PARTITIONBY name, title, _header.region STOREAS `PARQUET` \
             WITHPARTITIONER=Values WITH_FLUSH_COUNT = 3 WITH_FLUSH_SIZE=1024 \
             WITH_FLUSH_INTERVAL = 30",
        )
        .unwrap();
        let s = &statements[0];
        assert_eq!(s.topic, "my-topic");
        assert_eq!(s.format, Format::Parquet);
        assert_eq!(s.partitioner, PartitionDisplay::Values);
        assert_eq!(s.partition_by.len(), 3);
        assert_eq!(s.flush_count, Some(3));
        assert_eq!(s.flush_size, Some(1024));
        assert_eq!(s.flush_interval_secs, Some(30));
    }

    #[test]
    fn multiple_statements() {
        let statements = parse(
            "INSERT INTO b:one SELECT * FROM t1; INSERT INTO b:two SELECT * FROM t2;",
        )
        .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].prefix, "two");
    }

    #[test]
    fn bucket_without_prefix() {
        let statements = parse("INSERT INTO bucket SELECT * FROM t").unwrap();
        assert_eq!(statements[0].bucket, "bucket");
        assert_eq!(statements[0].prefix, "");
    }

    #[test]
    fn nested_prefix_is_rejected() {
        let err = parse("INSERT INTO bucket:a/b SELECT * FROM t").unwrap_err();
        assert!(matches!(err, ConfigError::NestedPrefixUnsupported { .. }));
    }

    #[test]
    fn slash_in_partition_path_is_rejected() {
        let err =
            parse("INSERT INTO b:p SELECT * FROM t PARTITIONBY a/b").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPartitionPath { .. }));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let err = parse("INSERT INTO b:p SELECT * FROM t STOREAS `XML`").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFormat { .. }));
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err =
            parse("INSERT INTO b:p SELECT * FROM t WITH_FLUSH_COUNT=0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));
    }

    #[test]
    fn malformed_threshold_is_rejected() {
        let err =
            parse("INSERT INTO b:p SELECT * FROM t WITH_FLUSH_SIZE=lots").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold { .. }));
    }

    #[test]
    fn reserved_selectors_require_values_mode() {
        let err =
            parse("INSERT INTO b:p SELECT * FROM t PARTITIONBY _topic").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SelectorRequiresValuesMode { .. }
        ));

        let ok = parse(
            "INSERT INTO b:p SELECT * FROM t PARTITIONBY _topic WITHPARTITIONER=Values",
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn garbage_is_a_syntax_error() {
        assert!(matches!(
            parse("UPSERT INTO b:p SELECT * FROM t"),
            Err(ConfigError::KcqlSyntax { .. })
        ));
        assert!(matches!(
            parse("INSERT INTO b:p SELECT * FROM t DANCING"),
            Err(ConfigError::KcqlSyntax { .. })
        ));
    }
}
