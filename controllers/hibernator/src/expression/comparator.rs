//! Plain field comparisons
//!
//! Expressions such as `metadata.name==api`, `spec.replicas>=2`,
//! `!metadata.deletionTimestamp` or a bare `spec.paused`. Clauses may be
//! combined with `&&` and `||`; `&&` binds tighter.

use std::cmp::Ordering;

use serde_json::Value;

use super::ExpressionError;
use super::path::resolve;

/// Operators in matching order; the first one found in a clause wins
const OPERATORS: [&str; 9] = ["==", "!=", "!", ">=", "<=", "=>", "=<", ">", "<"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Equal,
    NotEqual,
    Absent,
    Present,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Less,
}

impl Operator {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "==" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            "!" => Some(Self::Absent),
            ">=" | "=>" => Some(Self::GreaterOrEqual),
            "<=" | "=<" => Some(Self::LessOrEqual),
            ">" => Some(Self::Greater),
            "<" => Some(Self::Less),
            _ => None,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Equal => ordering.is_eq(),
            Self::NotEqual => ordering.is_ne(),
            Self::GreaterOrEqual => ordering.is_ge(),
            Self::LessOrEqual => ordering.is_le(),
            Self::Greater => ordering.is_gt(),
            Self::Less => ordering.is_lt(),
            Self::Present | Self::Absent => false,
        }
    }
}

/// A single `path <op> literal` clause
#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause<'a> {
    operator: Operator,
    path: &'a str,
    literal: &'a str,
}

fn split_clause(clause: &str) -> Result<Clause<'_>, ExpressionError> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Err(ExpressionError::Parse("empty comparison".to_string()));
    }

    let Some((token, operator)) = OPERATORS
        .iter()
        .find(|token| clause.contains(**token))
        .and_then(|token| Operator::from_token(token).map(|op| (*token, op)))
    else {
        return Ok(Clause {
            operator: Operator::Present,
            path: clause,
            literal: "",
        });
    };

    if operator == Operator::Absent {
        return match clause.strip_prefix('!') {
            Some(path) if !path.trim().is_empty() && !path.contains('!') => Ok(Clause {
                operator,
                path: path.trim(),
                literal: "",
            }),
            _ => Err(ExpressionError::Parse(format!("unexpected '!' in {clause:?}"))),
        };
    }

    let (path, literal) = clause
        .split_once(token)
        .ok_or_else(|| ExpressionError::Parse(clause.to_string()))?;
    let path = path.trim();
    if path.is_empty() {
        return Err(ExpressionError::Parse(format!("missing field path in {clause:?}")));
    }
    Ok(Clause {
        operator,
        path,
        literal: unquote(literal.trim()),
    })
}

fn unquote(literal: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = literal
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    literal
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn evaluate_clause(document: &Value, clause: &Clause<'_>) -> Result<bool, ExpressionError> {
    let found = resolve(document, clause.path);
    let value = match clause.operator {
        Operator::Present => return Ok(found.is_some()),
        Operator::Absent => return Ok(found.is_none()),
        _ => match found {
            Some(value) => value,
            None => return Ok(false),
        },
    };

    let ordering = match value.as_f64() {
        Some(number) => {
            let Ok(expected) = clause.literal.parse::<f64>() else {
                return Err(ExpressionError::Evaluation(format!(
                    "{} is numeric but {:?} is not",
                    clause.path, clause.literal
                )));
            };
            number.partial_cmp(&expected)
        }
        None => Some(as_text(&value).as_str().cmp(clause.literal)),
    };
    let Some(ordering) = ordering else {
        return Ok(false);
    };

    Ok(clause.operator.accepts(ordering))
}

/// Evaluate a comparison expression against `document`
pub fn evaluate(document: &Value, expression: &str) -> Result<bool, ExpressionError> {
    for alternative in expression.split("||") {
        let mut all = true;
        for clause in alternative.split("&&") {
            if !evaluate_clause(document, &split_clause(clause)?)? {
                all = false;
                break;
            }
        }
        if all {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment() -> Value {
        json!({
            "metadata": {"name": "nginx-deployment", "labels": {"app": "nginx"}},
            "spec": {"replicas": 3, "paused": false}
        })
    }

    #[test]
    fn test_operator_matching_order() {
        let cases = [
            ("name==prashant", Operator::Equal),
            ("name!=prashant", Operator::NotEqual),
            ("name>=prashant", Operator::GreaterOrEqual),
            ("name<=prashant", Operator::LessOrEqual),
            ("name=>prashant", Operator::GreaterOrEqual),
            ("name=<prashant", Operator::LessOrEqual),
            ("name>prashant", Operator::Greater),
            ("name<prashant", Operator::Less),
        ];
        for (input, expected) in cases {
            let clause = split_clause(input).unwrap();
            assert_eq!(clause.operator, expected, "{input}");
            assert_eq!(clause.path, "name");
            assert_eq!(clause.literal, "prashant");
        }

        let bare = split_clause("name").unwrap();
        assert_eq!(bare.operator, Operator::Present);
        let absent = split_clause("!name").unwrap();
        assert_eq!(absent.operator, Operator::Absent);
        assert_eq!(absent.path, "name");
    }

    #[test]
    fn test_string_comparisons() {
        let d = deployment();
        assert!(evaluate(&d, "metadata.name==nginx-deployment").unwrap());
        assert!(evaluate(&d, "metadata.name == 'nginx-deployment'").unwrap());
        assert!(evaluate(&d, "metadata.labels.app!=redis").unwrap());
        assert!(evaluate(&d, "metadata.name>apache").unwrap());
        assert!(!evaluate(&d, "metadata.name<apache").unwrap());
    }

    #[test]
    fn test_numeric_comparisons() {
        let d = deployment();
        assert!(evaluate(&d, "spec.replicas==3").unwrap());
        assert!(evaluate(&d, "spec.replicas>=3").unwrap());
        assert!(evaluate(&d, "spec.replicas=>2").unwrap());
        assert!(evaluate(&d, "spec.replicas>2.5").unwrap());
        assert!(!evaluate(&d, "spec.replicas<3").unwrap());
        // 10 > 3 numerically even though "10" < "3" lexically
        assert!(evaluate(&d, "spec.replicas<10").unwrap());
        assert!(evaluate(&d, "spec.replicas==many").is_err());
    }

    #[test]
    fn test_existence() {
        let d = deployment();
        assert!(evaluate(&d, "spec.paused").unwrap());
        assert!(evaluate(&d, "!metadata.deletionTimestamp").unwrap());
        assert!(!evaluate(&d, "!spec.replicas").unwrap());
        assert!(!evaluate(&d, "spec.missing==1").unwrap());
    }

    #[test]
    fn test_logical_composition() {
        let d = deployment();
        assert!(evaluate(&d, "spec.replicas==3 && metadata.labels.app==nginx").unwrap());
        assert!(!evaluate(&d, "spec.replicas==3 && metadata.labels.app==redis").unwrap());
        assert!(evaluate(&d, "spec.replicas==1 || metadata.labels.app==nginx").unwrap());
        assert!(evaluate(&d, "spec.replicas==1 && spec.paused || metadata.name==nginx-deployment").unwrap());
    }

    #[test]
    fn test_malformed() {
        let d = deployment();
        assert!(evaluate(&d, "").is_err());
        assert!(evaluate(&d, "==3").is_err());
        assert!(evaluate(&d, "spec!.replicas").is_err());
    }
}
