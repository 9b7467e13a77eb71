mod callbacks_test;
