use crate::visit;
use hcl::{Expression, Identifier, Traversal, TraversalOperator};
use std::collections::HashSet;

/// Replaces traversals naming a declared resource with the resource address literal
///
/// `aws_vpc.main.id` becomes `"aws_vpc.main"`, `aws_instance.web[1].id` becomes
/// `"aws_instance.web[1]"`. Inside a counted resource `count.index` becomes the instance index.
#[derive(derive_new::new)]
pub(crate) struct AddressRewriter<'a> {
    /// `(kind, name)` of every declared resource
    declared: &'a HashSet<(String, String)>,
    count_index: Option<usize>,
}

impl<'a> visit::VisitMut<Traversal> for AddressRewriter<'a> {
    #[tracing::instrument(level = "trace", skip_all)]
    fn visit_mut(&mut self, traversal: &mut Traversal) {
        let path = traversal.get_longest_path();

        if let (Some(index), ["count", "index", ..]) = (self.count_index, path_strs(&path).as_slice()) {
            let index = u64::try_from(index).unwrap_or_default();
            traversal.apply_substitution(Expression::Number(index.into()), 2);
            return;
        }

        let [kind, name, ..] = path.as_slice() else {
            return;
        };
        if !self.declared.contains(&(kind.to_string(), name.to_string())) {
            return;
        }

        let address = match traversal.operators.get(1).and_then(|operator| self.index(operator)) {
            Some(index) => format!("{kind}.{name}[{index}]"),
            None => format!("{kind}.{name}"),
        };

        tracing::trace!(%address, "rewriting resource traversal");
        // attributes of the referenced resource are not known before apply
        traversal.expr = Expression::String(address);
        traversal.operators.clear();
    }
}

impl<'a> AddressRewriter<'a> {
    /// A literal index, or `count.index` of the instance being loaded
    fn index(&self, operator: &TraversalOperator) -> Option<u64> {
        match operator {
            TraversalOperator::Index(Expression::Number(number)) => number.as_u64(),
            TraversalOperator::LegacyIndex(index) => Some(*index),
            TraversalOperator::Index(Expression::Traversal(inner)) => {
                let path = inner.get_longest_path();
                match (self.count_index, path_strs(&path).as_slice()) {
                    (Some(index), ["count", "index"]) => u64::try_from(index).ok(),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn path_strs(path: &[Identifier]) -> Vec<&str> {
    path.iter().map(|identifier| identifier.as_str()).collect()
}

/// Provider configuration key of a `provider = aws.west` meta argument
pub(crate) fn provider_key(expression: &Expression) -> Option<String> {
    match expression {
        Expression::Variable(variable) => Some(variable.as_str().to_string()),
        Expression::Traversal(traversal) => {
            let path = traversal.get_longest_path();
            (!path.is_empty()).then(|| path_strs(&path).join("."))
        }
        Expression::String(key) => Some(key.clone()),
        _ => None,
    }
}

trait TraversalExt {
    fn apply_substitution(&mut self, expr: Expression, path_len: usize);
    fn get_longest_path(&self) -> Vec<Identifier>;
    fn squash(&mut self);
}

impl TraversalExt for Traversal {
    /// Replace the variable and the first `path_len - 1` operators with `expr`
    #[tracing::instrument(level = "trace")]
    fn apply_substitution(&mut self, expr: Expression, path_len: usize) {
        let remove = path_len.saturating_sub(1);

        self.expr = expr;

        if remove >= self.operators.len() {
            self.operators.clear();
        } else {
            self.operators.rotate_left(remove);
            self.operators.truncate(self.operators.len() - remove);
        }

        // HACK: Flatten traversal if case we were passed a traversal as expression
        self.squash();

        tracing::trace!(traversal=?self,"after substitution");
    }

    fn get_longest_path(&self) -> Vec<Identifier> {
        let Expression::Variable(var) = &self.expr else {
            return vec![];
        };

        let mut path = vec![hcl::Identifier::unchecked(var.as_str())];
        for operator in &self.operators {
            let TraversalOperator::GetAttr(ident) = operator else {
                break;
            };

            path.push(ident.clone());
        }

        path
    }

    /// Squash nested Traversals
    ///
    /// Turns `<foo.bar>.baz` into `foo.bar.baz`.
    fn squash(&mut self) {
        let Traversal {
            expr: Expression::Traversal(inner),
            operators,
            ..
        } = self
        else {
            return;
        };

        inner.operators.append(operators);
        std::mem::swap(&mut self.operators, &mut inner.operators);

        self.expr = std::mem::replace(&mut inner.expr, Expression::Null);
        tracing::trace!(traversal=?self, "traversal squashed")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::visit::VisitTraversalsMut;
    use pretty_assertions::assert_eq;

    #[test]
    fn apply_substitution() {
        let mut traversal = Traversal::builder(hcl::Variable::unchecked("one"))
            .attr("two")
            .attr("three")
            .attr("four")
            .build();

        traversal.apply_substitution(hcl::Variable::unchecked("substitution").into(), 3);

        let expected = Traversal::builder(hcl::Variable::unchecked("substitution"))
            .attr("four")
            .build();

        assert_eq!(traversal, expected);
    }

    fn rewrite(expression: &str, count_index: Option<usize>) -> Expression {
        let declared = HashSet::from([
            ("aws_vpc".to_string(), "main".to_string()),
            ("aws_instance".to_string(), "web".to_string()),
        ]);
        let mut expression: Expression = hcl::parse(&format!("x = {expression}"))
            .unwrap()
            .attributes()
            .next()
            .unwrap()
            .expr
            .clone();

        expression.visit_traversals_mut(&mut AddressRewriter::new(&declared, count_index));
        expression
    }

    #[test]
    fn rewrites_declared_resources() {
        assert_eq!(rewrite("aws_vpc.main.id", None), Expression::String("aws_vpc.main".into()));
        assert_eq!(rewrite("aws_instance.web[2].id", None), Expression::String("aws_instance.web[2]".into()));
        assert_eq!(rewrite("count.index", Some(3)), Expression::Number(3u64.into()));
        assert_eq!(
            rewrite("aws_instance.web[count.index].id", Some(1)),
            Expression::String("aws_instance.web[1]".into())
        );
    }

    #[test]
    fn leaves_everything_else() {
        let expression = rewrite("var.region", None);
        assert!(matches!(expression, Expression::Traversal(_)));

        let expression = rewrite("aws_vpc.other.id", None);
        assert!(matches!(expression, Expression::Traversal(_)));
    }
}
