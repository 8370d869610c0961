use super::{Declaration, Expression, Selector, Statement};
use crate::relationship::Relationship;
use std::fmt;
use std::mem;

/// A run of declarations sharing one condition. `None` means unconditional.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub condition: Option<Expression>,
    pub declarations: Vec<Declaration>,
}

/// Turns nested selectors into an ordered list of conditional rules.
///
/// Source order is preserved: declarations before a nested selector form one rule,
/// the selector's contents follow, and declarations after it form another rule.
/// A selector without direct declarations contributes no rule of its own.
pub fn flatten(statements: &[Statement]) -> Vec<Rule> {
    let mut rules = Vec::new();
    flatten_into(statements, None, &mut rules);
    rules
}

fn flatten_into(statements: &[Statement], condition: Option<&Expression>, rules: &mut Vec<Rule>) {
    let mut pending = Vec::new();
    for statement in statements {
        match statement {
            Statement::Declaration(declaration) => pending.push(declaration.clone()),
            Statement::Selector(selector) => {
                push_rule(&mut pending, condition, rules);
                let nested = selector_condition(selector, condition);
                flatten_into(&selector.statements, nested.as_ref(), rules);
            }
        }
    }
    push_rule(&mut pending, condition, rules);
}

fn push_rule(pending: &mut Vec<Declaration>, condition: Option<&Expression>, rules: &mut Vec<Rule>) {
    if pending.is_empty() {
        return;
    }
    rules.push(Rule {
        condition: condition.cloned(),
        declarations: mem::take(pending),
    });
}

fn selector_condition(selector: &Selector, enclosing: Option<&Expression>) -> Option<Expression> {
    let own = selector.condition.clone();
    if &*selector.kind == "if" {
        return conjoin(enclosing.cloned(), own);
    }
    if let Some(relationship) = Relationship::from_selector_name(&selector.kind) {
        // `child { .. }` applies to the children of nodes matching the enclosing condition
        let target = enclosing
            .cloned()
            .unwrap_or_else(|| Expression::identifier("true"));
        let function = Expression::identifier(relationship.reciprocal().function_name());
        return conjoin(Some(Expression::apply(function, vec![target])), own);
    }
    let kind = Some(Expression::Identifier(selector.kind.clone()));
    conjoin(conjoin(kind, enclosing.cloned()), own)
}

fn conjoin(left: Option<Expression>, right: Option<Expression>) -> Option<Expression> {
    match (left, right) {
        (Some(left), Some(right)) => Some(Expression::and(left, right)),
        (left, None) => left,
        (None, right) => right,
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.condition {
            Some(condition) => writeln!(f, "when {condition}:")?,
            None => writeln!(f, "always:")?,
        }
        for declaration in &self.declarations {
            writeln!(f, "    {declaration}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{parse_expression, parse_rules};
    use super::*;

    fn rules(code: &str) -> Vec<(Option<String>, Vec<String>)> {
        flatten(&parse_rules("test.rules", code).unwrap())
            .into_iter()
            .map(|rule| {
                (
                    rule.condition.map(|condition| condition.to_string()),
                    rule.declarations
                        .iter()
                        .map(|declaration| declaration.property.to_string())
                        .collect(),
                )
            })
            .collect()
    }

    fn condition(code: &str) -> Option<String> {
        Some(parse_expression("expected", code).unwrap().to_string())
    }

    #[test]
    fn test_source_order_is_kept_around_nested_selectors() {
        assert_eq!(
            rules("a: 1; button { b: 2; } c: 3;"),
            vec![
                (None, vec!["a".to_string()]),
                (condition("button"), vec!["b".to_string()]),
                (None, vec!["c".to_string()]),
            ]
        );
    }

    #[test]
    fn test_kind_parent_and_own_conditions_are_conjoined() {
        assert_eq!(
            rules("window(focused) { button(enabled) { x: 1; } }"),
            vec![(
                condition("(button and (window and focused)) and enabled"),
                vec!["x".to_string()]
            )]
        );
    }

    #[test]
    fn test_if_adds_only_its_own_condition() {
        assert_eq!(
            rules("button { if(x > 1) { y: 1; } }"),
            vec![(condition("button and x > 1"), vec!["y".to_string()])]
        );
        assert_eq!(
            rules("if(flag) { y: 1; }"),
            vec![(condition("flag"), vec!["y".to_string()])]
        );
    }

    #[test]
    fn test_relationship_selectors_use_reciprocal_function() {
        assert_eq!(
            rules("window { child(button) { x: 1; } }"),
            vec![(
                condition("parent_matches(window) and button"),
                vec!["x".to_string()]
            )]
        );
        assert_eq!(
            rules("descendant { x: 1; }"),
            vec![(condition("ancestor_matches(true)"), vec!["x".to_string()])]
        );
        assert_eq!(
            rules("list { next_sibling { x: 1; } }"),
            vec![(
                condition("previous_sibling_matches(list)"),
                vec!["x".to_string()]
            )]
        );
    }

    #[test]
    fn test_selector_without_declarations_contributes_nothing() {
        assert_eq!(
            rules("window { button { } panel { label { z: 1; } } }"),
            vec![(
                condition("label and (panel and window)"),
                vec!["z".to_string()]
            )]
        );
    }
}
