use super::VisitMut;
use hcl::{
    template::{Directive, Element},
    Body, Expression, Operation, Structure, Template, TemplateExpr, Traversal, TraversalOperator,
};

/// Recursively visit all [hcl::Traversal]s mutably
pub trait VisitTraversalsMut {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>);
}

impl VisitTraversalsMut for Body {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>) {
        for structure in self {
            match structure {
                Structure::Attribute(attr) => attr.expr.visit_traversals_mut(visitor),
                Structure::Block(block) => block.body.visit_traversals_mut(visitor),
            }
        }
    }
}

impl VisitTraversalsMut for Expression {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>) {
        match self {
            Expression::Variable(variable) => {
                // a standalone variable is a traversal with no operators...kind of
                let mut traversal = Traversal::new(
                    Expression::Variable(variable.clone()),
                    Vec::<TraversalOperator>::new(),
                );
                visitor.visit_mut(&mut traversal);
                *self = collapse(traversal);
            }
            Expression::Traversal(traversal) => {
                visitor.visit_mut(traversal);
                traversal.expr.visit_traversals_mut(visitor);
                if traversal.operators.is_empty() {
                    let expr = std::mem::replace(&mut traversal.expr, Expression::Null);
                    *self = expr;
                }
            }
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_traversals_mut(visitor);
                }
            }
            Expression::Object(object) => {
                for value in object.values_mut() {
                    value.visit_traversals_mut(visitor);
                }
            }
            Expression::TemplateExpr(template_expr) => {
                let Ok(mut template) = Template::from_expr(template_expr) else {
                    return;
                };
                template.visit_traversals_mut(visitor);
                *template_expr = Box::new(TemplateExpr::QuotedString(template.to_string()));
            }
            Expression::FuncCall(call) => {
                for arg in call.args.iter_mut() {
                    arg.visit_traversals_mut(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_traversals_mut(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_traversals_mut(visitor);
                cond.true_expr.visit_traversals_mut(visitor);
                cond.false_expr.visit_traversals_mut(visitor);
            }
            Expression::Operation(operation) => match operation.as_mut() {
                Operation::Binary(binop) => {
                    binop.rhs_expr.visit_traversals_mut(visitor);
                    binop.lhs_expr.visit_traversals_mut(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_traversals_mut(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr
                    .cond_expr
                    .iter_mut()
                    .for_each(|e| e.visit_traversals_mut(visitor));
                forexpr
                    .key_expr
                    .iter_mut()
                    .for_each(|e| e.visit_traversals_mut(visitor));
                forexpr.value_expr.visit_traversals_mut(visitor);
                forexpr.collection_expr.visit_traversals_mut(visitor);
            }
            _ => {}
        }
    }
}

impl VisitTraversalsMut for Template {
    fn visit_traversals_mut(&mut self, visitor: &mut dyn VisitMut<Traversal>) {
        for element in self.elements_mut() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_traversals_mut(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_traversals_mut(visitor);
                        ifdir.true_template.visit_traversals_mut(visitor);
                        ifdir
                            .false_template
                            .iter_mut()
                            .for_each(|t| t.visit_traversals_mut(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.template.visit_traversals_mut(visitor);
                        fordir.collection_expr.visit_traversals_mut(visitor);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}

/// Unwrap a traversal whose operators were all consumed by a rewrite
fn collapse(traversal: Traversal) -> Expression {
    if traversal.operators.is_empty() {
        traversal.expr
    } else {
        Expression::Traversal(Box::new(traversal))
    }
}
