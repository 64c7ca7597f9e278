/// Linear layer forward pass.
///
/// Implemented using `matrixmultiply::dgemm`: `dst = src * weight^T + bias`.
///
/// # Arguments
///
/// * `src` - Input of shape `[R, D]` (row-major)
/// * `weight` - Weight of shape `[N, D]` (row-major)
/// * `bias` - Bias of shape `[N]`
/// * `dst` - Output of shape `[R, N]`
/// * `rows` - Number of rows `R`
/// * `input_dim` - Input dimension `D`
/// * `output_dim` - Output dimension `N`
///
/// # Example
///
/// ```
/// use facecalib_nn::linear::linear_layer_gemm;
///
/// let src = [[1.0, 2.0, 3.0]];
/// let weight = [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]];
/// let bias = [0.1, 0.2];
/// let mut dst = [[0.0, 0.0]];
///
/// linear_layer_gemm(
///     src.as_flattened(),
///     weight.as_flattened(),
///     &bias,
///     dst.as_flattened_mut(),
///     1,
///     3,
///     2,
/// );
///
/// assert!((dst[0][0] - 1.5).abs() < 1e-12);
/// assert!((dst[0][1] - 3.4).abs() < 1e-12);
/// ```
pub fn linear_layer_gemm(
    src: &[f64],
    weight: &[f64],
    bias: &[f64],
    dst: &mut [f64],
    rows: usize,
    input_dim: usize,
    output_dim: usize,
) {
    assert_eq!(src.len(), rows * input_dim, "Input size mismatch");
    assert_eq!(dst.len(), rows * output_dim, "Output size mismatch");
    assert_eq!(weight.len(), output_dim * input_dim, "Weight size mismatch");
    assert_eq!(bias.len(), output_dim, "Bias size mismatch");

    // 1. Set bias for each output row
    for output_row in dst.chunks_exact_mut(output_dim) {
        output_row.copy_from_slice(bias);
    }

    // 2. dst += src * weight^T (beta = 1.0 keeps the bias)
    // SAFETY: all slice lengths are checked above against the gemm dimensions.
    unsafe {
        matrixmultiply::dgemm(
            /* m */ rows,
            /* k */ input_dim,
            /* n */ output_dim,
            /* alpha */ 1.0,
            /* a */ src.as_ptr(),
            /* rsa */ input_dim as isize,
            /* csa */ 1,
            /* b */ weight.as_ptr(),
            /* rsb */ 1,
            /* csb */ input_dim as isize,
            /* beta */ 1.0,
            /* c */ dst.as_mut_ptr(),
            /* rsc */ output_dim as isize,
            /* csc */ 1,
        );
    }
}

/// Linear layer backward pass.
///
/// Accumulates `grad_weight += grad_dst^T * src` and `grad_bias += sum_rows(grad_dst)`.
/// When `grad_src` is given it is overwritten with `grad_dst * weight`.
#[allow(clippy::too_many_arguments)]
pub fn linear_layer_backward(
    src: &[f64],
    weight: &[f64],
    grad_dst: &[f64],
    grad_weight: &mut [f64],
    grad_bias: &mut [f64],
    grad_src: Option<&mut [f64]>,
    rows: usize,
    input_dim: usize,
    output_dim: usize,
) {
    assert_eq!(src.len(), rows * input_dim, "Input size mismatch");
    assert_eq!(grad_dst.len(), rows * output_dim, "Output gradient size mismatch");
    assert_eq!(weight.len(), output_dim * input_dim, "Weight size mismatch");
    assert_eq!(grad_weight.len(), output_dim * input_dim, "Weight gradient size mismatch");
    assert_eq!(grad_bias.len(), output_dim, "Bias gradient size mismatch");

    for grad_row in grad_dst.chunks_exact(output_dim) {
        for (gb, g) in grad_bias.iter_mut().zip(grad_row.iter()) {
            *gb += g;
        }
    }

    // SAFETY: grad_dst is [R, N], src is [R, D] and grad_weight is [N, D], all checked above.
    unsafe {
        matrixmultiply::dgemm(
            /* m */ output_dim,
            /* k */ rows,
            /* n */ input_dim,
            /* alpha */ 1.0,
            /* a */ grad_dst.as_ptr(),
            /* rsa */ 1,
            /* csa */ output_dim as isize,
            /* b */ src.as_ptr(),
            /* rsb */ input_dim as isize,
            /* csb */ 1,
            /* beta */ 1.0,
            /* c */ grad_weight.as_mut_ptr(),
            /* rsc */ input_dim as isize,
            /* csc */ 1,
        );
    }

    if let Some(grad_src) = grad_src {
        assert_eq!(grad_src.len(), rows * input_dim, "Input gradient size mismatch");
        // SAFETY: grad_dst is [R, N], weight is [N, D] and grad_src is [R, D].
        unsafe {
            matrixmultiply::dgemm(
                /* m */ rows,
                /* k */ output_dim,
                /* n */ input_dim,
                /* alpha */ 1.0,
                /* a */ grad_dst.as_ptr(),
                /* rsa */ output_dim as isize,
                /* csa */ 1,
                /* b */ weight.as_ptr(),
                /* rsb */ input_dim as isize,
                /* csb */ 1,
                /* beta */ 0.0,
                /* c */ grad_src.as_mut_ptr(),
                /* rsc */ input_dim as isize,
                /* csc */ 1,
            );
        }
    }
}
