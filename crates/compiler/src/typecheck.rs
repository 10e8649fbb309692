//! Type decoration for the AST.
//!
//! Invoked once per statement as the parser appends it to a block.
//! Types propagate bottom-up; pointer arithmetic is rewritten here
//! (scaling the integer operand by the pointee size, dividing a
//! pointer difference by the element size) so the code generator only
//! ever sees plain integer arithmetic. Decoration is idempotent: a
//! node that already carries a type is left untouched.

use crate::ast::{BinaryOp, Node, NodeIds, NodeKind};
use crate::error::CompileError;
use crate::types::{Type, TypeKind};

/// Decorate `node` and all of its children with types.
pub fn add_type(node: &mut Node, ids: &mut NodeIds) -> Result<(), CompileError> {
    if node.ty.is_some() {
        return Ok(());
    }
    let kind = std::mem::replace(&mut node.kind, NodeKind::Number(0));
    let (kind, ty) = decorate(kind, ids)?;
    node.kind = kind;
    node.ty = ty;
    Ok(())
}

fn decorate(
    kind: NodeKind,
    ids: &mut NodeIds,
) -> Result<(NodeKind, Option<Type>), CompileError> {
    match kind {
        NodeKind::Number(value) => Ok((NodeKind::Number(value), Some(Type::int64()))),

        NodeKind::Variable(var) => {
            let ty = var.ty().clone();
            Ok((NodeKind::Variable(var), Some(ty)))
        }

        NodeKind::Binary { op, mut lhs, mut rhs } => {
            add_type(&mut lhs, ids)?;
            add_type(&mut rhs, ids)?;
            match op {
                BinaryOp::Add => check_add(lhs, rhs, ids),
                BinaryOp::Sub => check_sub(lhs, rhs, ids),
                BinaryOp::Mul | BinaryOp::Div => {
                    let ty = node_type(&lhs)?.clone();
                    Ok((NodeKind::Binary { op, lhs, rhs }, Some(ty)))
                }
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le => {
                    Ok((NodeKind::Binary { op, lhs, rhs }, Some(Type::int64())))
                }
            }
        }

        NodeKind::Negation(mut operand) => {
            add_type(&mut operand, ids)?;
            let ty = node_type(&operand)?.clone();
            Ok((NodeKind::Negation(operand), Some(ty)))
        }

        NodeKind::AddressOf(mut operand) => {
            add_type(&mut operand, ids)?;
            let operand_ty = node_type(&operand)?;
            // Taking the address of an array yields a pointer to its
            // element type.
            let ty = match (&operand_ty.kind, &operand_ty.base) {
                (TypeKind::Array, Some(element)) => Type::pointer_to((**element).clone()),
                _ => Type::pointer_to(operand_ty.clone()),
            };
            Ok((NodeKind::AddressOf(operand), Some(ty)))
        }

        NodeKind::Dereference(mut operand) => {
            add_type(&mut operand, ids)?;
            let operand_ty = node_type(&operand)?;
            let pointee = match (&operand_ty.kind, &operand_ty.base) {
                (TypeKind::Pointer | TypeKind::Array, Some(base)) => (**base).clone(),
                _ => {
                    return Err(CompileError::type_error(
                        "invalid pointer dereference",
                        operand_ty.to_string(),
                    ));
                }
            };
            if pointee.kind == TypeKind::Void {
                return Err(CompileError::type_error(
                    "invalid pointer dereference",
                    "void*",
                ));
            }
            Ok((NodeKind::Dereference(operand), Some(pointee)))
        }

        NodeKind::Assignment { mut lhs, mut rhs } => {
            add_type(&mut lhs, ids)?;
            add_type(&mut rhs, ids)?;
            let lhs_ty = node_type(&lhs)?.clone();
            if lhs_ty.kind == TypeKind::Array {
                return Err(CompileError::type_error("not an lvalue", lhs_ty.to_string()));
            }
            Ok((NodeKind::Assignment { lhs, rhs }, Some(lhs_ty)))
        }

        NodeKind::Comma { mut lhs, mut rhs } => {
            add_type(&mut lhs, ids)?;
            add_type(&mut rhs, ids)?;
            let ty = node_type(&rhs)?.clone();
            Ok((NodeKind::Comma { lhs, rhs }, Some(ty)))
        }

        NodeKind::DotAccess { mut base, member } => {
            add_type(&mut base, ids)?;
            let ty = member.ty.clone();
            Ok((NodeKind::DotAccess { base, member }, Some(ty)))
        }

        NodeKind::FunctionCall { name, mut args } => {
            for arg in &mut args {
                add_type(arg, ids)?;
            }
            // Calls always return in %rax.
            Ok((NodeKind::FunctionCall { name, args }, Some(Type::int64())))
        }

        NodeKind::ExpressionStatement(mut expr) => {
            add_type(&mut expr, ids)?;
            Ok((NodeKind::ExpressionStatement(expr), None))
        }

        NodeKind::Block(mut body) => {
            for stmt in &mut body {
                add_type(stmt, ids)?;
            }
            Ok((NodeKind::Block(body), None))
        }

        NodeKind::If {
            mut cond,
            mut then_branch,
            mut else_branch,
        } => {
            add_type(&mut cond, ids)?;
            add_type(&mut then_branch, ids)?;
            if let Some(branch) = else_branch.as_mut() {
                add_type(branch, ids)?;
            }
            Ok((
                NodeKind::If {
                    cond,
                    then_branch,
                    else_branch,
                },
                None,
            ))
        }

        NodeKind::For {
            mut init,
            mut cond,
            mut increment,
            mut body,
        } => {
            for part in [&mut init, &mut cond, &mut increment].into_iter().flatten() {
                add_type(part, ids)?;
            }
            add_type(&mut body, ids)?;
            Ok((
                NodeKind::For {
                    init,
                    cond,
                    increment,
                    body,
                },
                None,
            ))
        }

        NodeKind::Return(mut expr) => {
            add_type(&mut expr, ids)?;
            Ok((NodeKind::Return(expr), None))
        }
    }
}

/// `+` with the pointer-arithmetic rules applied.
fn check_add(
    mut lhs: Box<Node>,
    mut rhs: Box<Node>,
    ids: &mut NodeIds,
) -> Result<(NodeKind, Option<Type>), CompileError> {
    let lhs_ty = node_type(&lhs)?.clone();
    let rhs_ty = node_type(&rhs)?.clone();

    if lhs_ty.is_integer() && rhs_ty.is_integer() {
        let ty = lhs_ty;
        return Ok((
            NodeKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            },
            Some(ty),
        ));
    }
    if lhs_ty.is_pointer_like() && rhs_ty.is_pointer_like() {
        return Err(CompileError::type_error("invalid pointer operands", "+"));
    }
    // Canonicalize number + pointer to pointer + number.
    if rhs_ty.is_pointer_like() {
        std::mem::swap(&mut lhs, &mut rhs);
    }
    let ptr_ty = node_type(&lhs)?.clone();
    let scale = element_size(&ptr_ty)?;
    let rhs = scaled(rhs, scale, ids);
    Ok((
        NodeKind::Binary {
            op: BinaryOp::Add,
            lhs,
            rhs,
        },
        Some(ptr_ty),
    ))
}

/// `-` with the pointer-arithmetic rules applied.
fn check_sub(
    lhs: Box<Node>,
    rhs: Box<Node>,
    ids: &mut NodeIds,
) -> Result<(NodeKind, Option<Type>), CompileError> {
    let lhs_ty = node_type(&lhs)?.clone();
    let rhs_ty = node_type(&rhs)?.clone();

    if lhs_ty.is_integer() && rhs_ty.is_integer() {
        return Ok((
            NodeKind::Binary {
                op: BinaryOp::Sub,
                lhs,
                rhs,
            },
            Some(lhs_ty),
        ));
    }
    if lhs_ty.is_pointer_like() && rhs_ty.is_integer() {
        let scale = element_size(&lhs_ty)?;
        let rhs = scaled(rhs, scale, ids);
        return Ok((
            NodeKind::Binary {
                op: BinaryOp::Sub,
                lhs,
                rhs,
            },
            Some(lhs_ty),
        ));
    }
    if lhs_ty.is_pointer_like() && rhs_ty.is_pointer_like() {
        // Pointer difference: subtract, then divide by the element size.
        let scale = element_size(&lhs_ty)?;
        let mut difference = Node::new(
            NodeKind::Binary {
                op: BinaryOp::Sub,
                lhs,
                rhs,
            },
            ids.alloc(),
        );
        difference.ty = Some(Type::int64());
        let kind = NodeKind::Binary {
            op: BinaryOp::Div,
            lhs: Box::new(difference),
            rhs: number(scale, ids),
        };
        return Ok((kind, Some(Type::int())));
    }
    Err(CompileError::type_error("invalid pointer operands", "-"))
}

/// Multiply `expr` by the pointee size.
fn scaled(expr: Box<Node>, scale: i64, ids: &mut NodeIds) -> Box<Node> {
    let mut node = Node::new(
        NodeKind::Binary {
            op: BinaryOp::Mul,
            lhs: expr,
            rhs: number(scale, ids),
        },
        ids.alloc(),
    );
    node.ty = Some(Type::int64());
    Box::new(node)
}

fn number(value: i64, ids: &mut NodeIds) -> Box<Node> {
    let mut node = Node::new(NodeKind::Number(value), ids.alloc());
    node.ty = Some(Type::int64());
    Box::new(node)
}

fn element_size(ty: &Type) -> Result<i64, CompileError> {
    ty.base
        .as_deref()
        .map(|base| base.size)
        .ok_or_else(|| CompileError::type_error("invalid pointer operands", ty.to_string()))
}

fn node_type(node: &Node) -> Result<&Type, CompileError> {
    node.ty
        .as_ref()
        .ok_or_else(|| CompileError::codegen("expression node has no type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarRef;

    fn num(value: i64, ids: &mut NodeIds) -> Box<Node> {
        Box::new(Node::new(NodeKind::Number(value), ids.alloc()))
    }

    fn var(name: &str, ty: Type, ids: &mut NodeIds) -> Box<Node> {
        Box::new(Node::new(
            NodeKind::Variable(VarRef::Local {
                index: 0,
                name: name.to_string(),
                ty,
            }),
            ids.alloc(),
        ))
    }

    fn binary(op: BinaryOp, lhs: Box<Node>, rhs: Box<Node>, ids: &mut NodeIds) -> Node {
        Node::new(NodeKind::Binary { op, lhs, rhs }, ids.alloc())
    }

    #[test]
    fn test_number_is_int64() {
        let mut ids = NodeIds::new();
        let mut node = *num(7, &mut ids);
        add_type(&mut node, &mut ids).unwrap();
        assert_eq!(node.ty.unwrap().kind, TypeKind::Int64);
    }

    #[test]
    fn test_pointer_plus_number_scales_by_pointee_size() {
        let mut ids = NodeIds::new();
        let p = var("p", Type::pointer_to(Type::int()), &mut ids);
        let mut node = binary(BinaryOp::Add, p, num(2, &mut ids), &mut ids);
        add_type(&mut node, &mut ids).unwrap();

        assert_eq!(node.ty.as_ref().unwrap().kind, TypeKind::Pointer);
        let NodeKind::Binary { rhs, .. } = &node.kind else {
            panic!("expected a binary node");
        };
        let NodeKind::Binary {
            op: BinaryOp::Mul,
            rhs: scale,
            ..
        } = &rhs.kind
        else {
            panic!("expected the index to be scaled");
        };
        assert_eq!(scale.kind, NodeKind::Number(4));
    }

    #[test]
    fn test_number_plus_pointer_is_swapped() {
        let mut ids = NodeIds::new();
        let p = var("p", Type::pointer_to(Type::short()), &mut ids);
        let mut node = binary(BinaryOp::Add, num(1, &mut ids), p, &mut ids);
        add_type(&mut node, &mut ids).unwrap();

        assert_eq!(node.ty.as_ref().unwrap().kind, TypeKind::Pointer);
        let NodeKind::Binary { lhs, rhs, .. } = &node.kind else {
            panic!("expected a binary node");
        };
        assert!(matches!(lhs.kind, NodeKind::Variable(_)));
        // the number is scaled by sizeof(short)
        let NodeKind::Binary { rhs: scale, .. } = &rhs.kind else {
            panic!("expected the index to be scaled");
        };
        assert_eq!(scale.kind, NodeKind::Number(2));
    }

    #[test]
    fn test_pointer_plus_pointer_rejected() {
        let mut ids = NodeIds::new();
        let p = var("p", Type::pointer_to(Type::int()), &mut ids);
        let q = var("q", Type::pointer_to(Type::int()), &mut ids);
        let mut node = binary(BinaryOp::Add, p, q, &mut ids);
        let err = add_type(&mut node, &mut ids).unwrap_err();
        assert!(err.to_string().contains("invalid pointer operands"));
    }

    #[test]
    fn test_pointer_difference_divides_by_element_size() {
        let mut ids = NodeIds::new();
        let p = var("p", Type::pointer_to(Type::int64()), &mut ids);
        let q = var("q", Type::pointer_to(Type::int64()), &mut ids);
        let mut node = binary(BinaryOp::Sub, p, q, &mut ids);
        add_type(&mut node, &mut ids).unwrap();

        assert_eq!(node.ty.as_ref().unwrap().kind, TypeKind::Int);
        let NodeKind::Binary {
            op: BinaryOp::Div,
            rhs,
            ..
        } = &node.kind
        else {
            panic!("expected a division by the element size");
        };
        assert_eq!(rhs.kind, NodeKind::Number(8));
    }

    #[test]
    fn test_array_decays_in_pointer_arithmetic() {
        let mut ids = NodeIds::new();
        let a = var("a", Type::array_of(Type::int(), 3), &mut ids);
        let mut node = binary(BinaryOp::Add, a, num(1, &mut ids), &mut ids);
        add_type(&mut node, &mut ids).unwrap();
        // the scale is sizeof(int), not the array size
        let NodeKind::Binary { rhs, .. } = &node.kind else {
            panic!("expected a binary node");
        };
        let NodeKind::Binary { rhs: scale, .. } = &rhs.kind else {
            panic!("expected the index to be scaled");
        };
        assert_eq!(scale.kind, NodeKind::Number(4));
    }

    #[test]
    fn test_assignment_to_array_rejected() {
        let mut ids = NodeIds::new();
        let a = var("a", Type::array_of(Type::int(), 3), &mut ids);
        let mut node = Node::new(
            NodeKind::Assignment {
                lhs: a,
                rhs: num(0, &mut ids),
            },
            ids.alloc(),
        );
        let err = add_type(&mut node, &mut ids).unwrap_err();
        assert!(err.to_string().contains("not an lvalue"));
    }

    #[test]
    fn test_dereferencing_void_pointer_rejected() {
        let mut ids = NodeIds::new();
        let p = var("p", Type::pointer_to(Type::void()), &mut ids);
        let mut node = Node::new(NodeKind::Dereference(p), ids.alloc());
        let err = add_type(&mut node, &mut ids).unwrap_err();
        assert!(err.to_string().contains("invalid pointer dereference"));
    }

    #[test]
    fn test_dereferencing_non_pointer_rejected() {
        let mut ids = NodeIds::new();
        let x = var("x", Type::int(), &mut ids);
        let mut node = Node::new(NodeKind::Dereference(x), ids.alloc());
        let err = add_type(&mut node, &mut ids).unwrap_err();
        assert!(err.to_string().contains("invalid pointer dereference"));
    }

    #[test]
    fn test_comparison_is_int64() {
        let mut ids = NodeIds::new();
        let mut node = binary(BinaryOp::Lt, num(1, &mut ids), num(2, &mut ids), &mut ids);
        add_type(&mut node, &mut ids).unwrap();
        assert_eq!(node.ty.unwrap().kind, TypeKind::Int64);
    }

    #[test]
    fn test_decoration_is_idempotent() {
        let mut ids = NodeIds::new();
        let p = var("p", Type::pointer_to(Type::int()), &mut ids);
        let mut node = binary(BinaryOp::Add, p, num(1, &mut ids), &mut ids);
        add_type(&mut node, &mut ids).unwrap();
        let first = node.clone();
        add_type(&mut node, &mut ids).unwrap();
        // a second pass must not scale the index again
        assert_eq!(node, first);
    }
}
